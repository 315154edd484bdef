//! Core data types: messages, device configuration, tags and events.

pub mod config;
pub mod event;
pub mod message;
pub mod tag;

pub use config::{DeviceConfig, DeviceStatus, RegistryConfig, DEFAULT_CONNECT_TIMEOUT_MS};
pub use event::{
    ChangeType, DataChangedEvent, DeviceEvent, MappingTriggeredEvent, MessageLogEntry, TagEvent,
};
pub use message::{classify, Direction, Message, Role, HEADER_LENGTH, REQUIRE_RESPONSE_BIT};
pub use tag::{
    Edge, Tag, TagDataType, TagValue, TriggerCondition, BIT_GROUP, WORD_GROUP,
};
