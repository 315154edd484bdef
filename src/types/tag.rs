//! Tag definitions for the polling and edge-trigger engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conventional group name for Boolean trigger tags.
pub const BIT_GROUP: &str = "Bit";

/// Conventional group name for word payload tags.
pub const WORD_GROUP: &str = "Word";

/// Data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagDataType {
    /// Boolean bit tag
    Bool,
    /// Integer word tag
    Word,
    /// Floating-point tag
    Float,
    /// Text tag
    Text,
}

/// A typed tag value. Value equality drives change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    /// Boolean value
    Bool(bool),
    /// Integer word value
    Word(i32),
    /// Floating-point value
    Float(f64),
    /// Text value
    Text(String),
}

impl TagValue {
    /// The zero value for a data type.
    pub fn default_for(data_type: TagDataType) -> Self {
        match data_type {
            TagDataType::Bool => Self::Bool(false),
            TagDataType::Word => Self::Word(0),
            TagDataType::Float => Self::Float(0.0),
            TagDataType::Text => Self::Text(String::new()),
        }
    }

    /// Data type of this value.
    pub fn data_type(&self) -> TagDataType {
        match self {
            Self::Bool(_) => TagDataType::Bool,
            Self::Word(_) => TagDataType::Word,
            Self::Float(_) => TagDataType::Float,
            Self::Text(_) => TagDataType::Text,
        }
    }

    /// Boolean value, if this is a bit tag value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Word(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// A Boolean transition observed between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    /// false → true
    Rising,
    /// true → false
    Falling,
}

/// Condition under which a bit-tag mapping fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Fire on false → true
    RisingEdge,
    /// Fire on true → false
    FallingEdge,
    /// Fire on any transition
    BothEdges,
    /// Level-sensitive high; edge gating is delegated to the caller
    LevelHigh,
    /// Level-sensitive low; edge gating is delegated to the caller
    LevelLow,
}

impl TriggerCondition {
    /// Whether an observed edge satisfies this condition.
    ///
    /// Level conditions always match here; level gating is a caller concern.
    pub fn matches(&self, edge: Edge) -> bool {
        match self {
            Self::RisingEdge => edge == Edge::Rising,
            Self::FallingEdge => edge == Edge::Falling,
            Self::BothEdges => true,
            Self::LevelHigh | Self::LevelLow => true,
        }
    }
}

/// One monitored data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name, unique within the store
    pub name: String,
    /// Polling group, `"Bit"` or `"Word"` by convention
    pub group_name: String,
    /// Data type
    pub data_type: TagDataType,
    /// Scan rate of this tag in milliseconds
    pub scan_rate_ms: u64,
    /// Current value
    pub current_value: TagValue,
    /// Value before the last detected change
    pub previous_value: TagValue,
    /// Time of the last detected change
    pub last_changed: Option<DateTime<Utc>>,
    /// Word tags to read when this bit tag sees a configured edge
    pub triggered_tags: Vec<String>,
    /// Inferred trigger condition (bit tags with mappings only)
    pub trigger_condition: Option<TriggerCondition>,
}

impl Tag {
    /// Create a tag with zeroed values.
    pub fn new(
        name: impl Into<String>,
        group_name: impl Into<String>,
        data_type: TagDataType,
        scan_rate_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            group_name: group_name.into(),
            data_type,
            scan_rate_ms,
            current_value: TagValue::default_for(data_type),
            previous_value: TagValue::default_for(data_type),
            last_changed: None,
            triggered_tags: Vec::new(),
            trigger_condition: None,
        }
    }

    /// Declare the word tags this bit tag triggers.
    pub fn triggered_tags(mut self, targets: Vec<String>) -> Self {
        self.triggered_tags = targets;
        self
    }

    /// Whether this tag belongs to the Boolean trigger group.
    pub fn is_bit(&self) -> bool {
        self.group_name == BIT_GROUP
    }
}
