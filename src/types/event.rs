//! Events emitted to the consuming layers (UI, forwarding, persistence).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Direction, Message};
use super::tag::{TagDataType, TagValue, TriggerCondition};

/// Events published by the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A device transitioned between connected and disconnected.
    StatusChanged {
        /// Device key
        device_id: String,
        /// New connection state
        is_connected: bool,
        /// Status label, `"Connected"` or `"Disconnected"`
        status: String,
        /// Resolved mode label, `"Client"` or `"Server"`
        mode: String,
        /// Transition time
        timestamp: DateTime<Utc>,
    },
    /// A frame arrived on one of the device's connections.
    MessageReceived {
        /// Device key
        device_id: String,
        /// Message body
        content: String,
        /// Arrival time
        timestamp: DateTime<Utc>,
        /// Whether the sender flagged the frame as user-driven
        is_user_interactive: bool,
        /// The decoded frame
        message: Message,
    },
}

/// Change classification derived from the tag's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Change on a Boolean trigger tag
    BitChange,
    /// Change on a word payload tag
    WordChange,
}

/// Emitted whenever a poll detects `current != previous` on a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangedEvent {
    /// Owning server/device id
    pub server_id: String,
    /// Tag address (name)
    pub address: String,
    /// Tag data type
    pub data_type: TagDataType,
    /// Value before the change
    pub old_value: TagValue,
    /// Value after the change
    pub new_value: TagValue,
    /// Detection time
    pub timestamp: DateTime<Utc>,
    /// Bit or word classification
    pub change_type: ChangeType,
}

/// Emitted when a bit-tag edge satisfies a configured mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTriggeredEvent {
    /// Mapping key, `deviceId_bitTagName`
    pub mapping_id: String,
    /// Triggering bit tag
    pub bit_address_id: String,
    /// Word tag read by the trigger
    pub word_address_id: String,
    /// Value read from the word tag
    pub word_value: TagValue,
    /// Condition that fired
    pub trigger_condition: TriggerCondition,
    /// Trigger time
    pub triggered_time: DateTime<Utc>,
}

/// Events published by the tag monitoring side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagEvent {
    /// A polled tag changed value.
    DataChanged(DataChangedEvent),
    /// A bit-tag edge fired a configured mapping.
    MappingTriggered(MappingTriggeredEvent),
}

/// One entry in a device's bounded message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    /// Incoming or outgoing
    pub direction: Direction,
    /// The message
    pub message: Message,
    /// Whether the operation succeeded
    pub success: bool,
    /// Failure detail for unsuccessful operations
    pub error: Option<String>,
    /// Record time
    pub timestamp: DateTime<Utc>,
}

impl MessageLogEntry {
    /// Record a successful operation.
    pub fn ok(direction: Direction, message: Message) -> Self {
        Self {
            direction,
            message,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a failed operation with its error text.
    pub fn failed(direction: Direction, message: Message, error: impl Into<String>) -> Self {
        Self {
            direction,
            message,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}
