//! HSMS message frame and stream/function classification.
//!
//! A message is identified by its (stream, function) pair, e.g. S1F13.
//! Odd functions are requests, the matching even function is the reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed header length of an HSMS frame in bytes.
pub const HEADER_LENGTH: usize = 10;

/// Bit 7 of header byte 4 carries the require-response flag.
pub const REQUIRE_RESPONSE_BIT: u8 = 0x80;

/// Message direction relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Received from a peer
    Incoming,
    /// Sent by this process
    Outgoing,
}

/// Connection role of a logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Outbound connection to a single remote endpoint
    Client,
    /// Listening endpoint accepting any number of remote clients
    Server,
}

impl Role {
    /// Human-readable mode label, as surfaced in status events.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Server => "Server",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One HSMS-style frame.
///
/// Immutable once constructed. The wire form is a 10-byte header followed
/// by the raw ASCII content bytes (see [`crate::codec`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stream number (header bytes 1-2, big-endian)
    pub stream: u16,
    /// Function number (header byte 3)
    pub function: u8,
    /// Whether the sender expects a reply (bit 7 of header byte 4)
    pub require_response: bool,
    /// Device id value carried from the device configuration
    pub device_id_value: u8,
    /// Session id value carried from the device configuration
    pub session_id_value: i32,
    /// ASCII message body
    pub content: String,
    /// Direction relative to this process
    pub direction: Direction,
    /// Role of the endpoint that produced the frame
    pub sender_role: Role,
    /// Identifier of the producing endpoint (device id or connection id)
    pub sender_id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Semantic label derived from (stream, function)
    pub message_type: String,
    /// Set when a user action (not an automatic loop) produced the frame
    pub is_user_interactive: bool,
}

impl Message {
    /// Create an outgoing message.
    pub fn outgoing(
        stream: u16,
        function: u8,
        content: impl Into<String>,
        require_response: bool,
        sender_id: impl Into<String>,
        sender_role: Role,
    ) -> Self {
        Self {
            stream,
            function,
            require_response,
            device_id_value: 0,
            session_id_value: 0,
            content: content.into(),
            direction: Direction::Outgoing,
            sender_role,
            sender_id: sender_id.into(),
            timestamp: Utc::now(),
            message_type: classify(stream, function).to_string(),
            is_user_interactive: false,
        }
    }

    /// Create an incoming message, as produced by the frame decoder.
    pub fn incoming(
        stream: u16,
        function: u8,
        content: impl Into<String>,
        require_response: bool,
        sender_id: impl Into<String>,
        sender_role: Role,
    ) -> Self {
        Self {
            direction: Direction::Incoming,
            ..Self::outgoing(stream, function, content, require_response, sender_id, sender_role)
        }
    }

    /// Attach the session identity from a device configuration.
    pub fn with_session(mut self, device_id_value: u8, session_id_value: i32) -> Self {
        self.device_id_value = device_id_value;
        self.session_id_value = session_id_value;
        self
    }

    /// Mark the message as produced by a user action.
    pub fn user_interactive(mut self) -> Self {
        self.is_user_interactive = true;
        self
    }

    /// Build the S(x)F(y+1) reply frame for this message.
    ///
    /// Follows the SECS convention that the even function one above the
    /// request carries its response. The reply never requires a response.
    pub fn reply_to(&self, content: impl Into<String>, sender_id: impl Into<String>, sender_role: Role) -> Self {
        Self::outgoing(
            self.stream,
            self.function.wrapping_add(1),
            content,
            false,
            sender_id,
            sender_role,
        )
        .with_session(self.device_id_value, self.session_id_value)
    }

    /// `SxFy` code of this message, e.g. `"S6F11"`.
    pub fn sf_code(&self) -> String {
        format!("S{}F{}", self.stream, self.function)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.sf_code(), self.message_type, self.content)
    }
}

/// Classify a (stream, function) pair into its semantic label.
///
/// Unknown pairs map to `"Unknown"`.
pub fn classify(stream: u16, function: u8) -> &'static str {
    match (stream, function) {
        (1, 13) => "Are You There",
        (1, 14) => "Are You There Reply",
        (1, 3) => "Equipment Status Request",
        (1, 4) => "Equipment Status Data",
        (2, 41) => "Remote Command",
        (2, 42) => "Remote Command Acknowledge",
        (5, 1) => "Alarm Report",
        (5, 2) => "Alarm Report Acknowledge",
        (6, 11) => "Event Report",
        (6, 12) => "Event Report Acknowledge",
        (7, 3) => "Process Program Send",
        (7, 4) => "Process Program Acknowledge",
        (10, 3) => "Terminal Display",
        (10, 4) => "Terminal Display Acknowledge",
        _ => "Unknown",
    }
}
