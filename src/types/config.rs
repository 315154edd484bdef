//! Device configuration and status projections.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Role;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Identity and policy for one logical device.
///
/// Supplied by an external configuration loader; this crate only consumes
/// the parsed structure. Live status is tracked by the registry, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device key
    pub device_id: String,
    /// Display name
    pub device_name: String,
    /// Connection role
    pub role: Role,
    /// Remote host (Client role) or bind address (Server role)
    pub host: String,
    /// TCP port; 0 requests an ephemeral port in Server role
    pub port: u16,
    /// Device id value stamped into outgoing messages
    pub device_id_value: u8,
    /// Session id value stamped into outgoing messages
    pub session_id_value: i32,
    /// Connect timeout in milliseconds
    pub connection_timeout_ms: u64,
    /// Connect automatically at startup
    pub auto_connect: bool,
    /// Disabled devices are registered but never connected
    pub enabled: bool,
}

impl DeviceConfig {
    /// Create a configuration with default policy fields.
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        role: Role,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            role,
            host: host.into(),
            port,
            device_id_value: 0,
            session_id_value: 0,
            connection_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            auto_connect: false,
            enabled: true,
        }
    }

    /// Set the session identity values.
    pub fn session(mut self, device_id_value: u8, session_id_value: i32) -> Self {
        self.device_id_value = device_id_value;
        self.session_id_value = session_id_value;
        self
    }

    /// Set the connect timeout.
    pub fn connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = ms;
        self
    }

    /// Set the auto-connect flag.
    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.auto_connect = auto;
        self
    }

    /// Socket address string, `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Registry-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum retained message-log entries per device
    pub max_log_entries: usize,
    /// Capacity of the outbound event channel
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 200,
            event_channel_capacity: 256,
        }
    }
}

/// Read-only projection of a device's configuration and live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device key
    pub device_id: String,
    /// Display name
    pub device_name: String,
    /// Resolved mode label, `"Client"` or `"Server"`
    pub mode: String,
    /// Whether the device currently holds at least one live connection
    pub is_connected: bool,
    /// Status label: `"Connected"`, `"Disconnected"` or `"Unknown"`
    pub status: String,
    /// Count of messages received since registration
    pub message_count: u64,
    /// Number of accepted remote clients (Server role only)
    pub client_count: usize,
    /// Time of the last successful connect
    pub last_connection_time: Option<DateTime<Utc>>,
    /// Content of the most recent incoming message
    pub last_auto_message: Option<String>,
    /// Arrival time of the most recent incoming message
    pub last_auto_message_time: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// Sentinel status for an id that is not registered.
    pub fn unknown(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: String::new(),
            mode: String::new(),
            is_connected: false,
            status: "Unknown".to_string(),
            message_count: 0,
            client_count: 0,
            last_connection_time: None,
            last_auto_message: None,
            last_auto_message_time: None,
        }
    }
}
