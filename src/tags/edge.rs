//! Boolean edge detection and bit→word trigger mappings.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::history::EventHistory;
use super::store::TagStore;
use crate::types::{Edge, MappingTriggeredEvent, Tag, TriggerCondition};

/// Pluggable trigger-condition classifier.
///
/// Maps a bit-tag name to the condition its mappings fire on. The default
/// is a best-effort name heuristic, not a hard contract; deployments with
/// explicit condition configuration supply their own classifier.
pub type ConditionClassifier = dyn Fn(&str) -> TriggerCondition + Send + Sync;

/// Default name-based classifier: `Start`/`CMD` → rising edge,
/// `Alarm`/`Error` → both edges, anything else → rising edge.
/// Matching is case-insensitive.
pub fn default_classifier(tag_name: &str) -> TriggerCondition {
    let name = tag_name.to_ascii_lowercase();
    if name.contains("start") || name.contains("cmd") {
        TriggerCondition::RisingEdge
    } else if name.contains("alarm") || name.contains("error") {
        TriggerCondition::BothEdges
    } else {
        TriggerCondition::RisingEdge
    }
}

/// One configured bit→word trigger association.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMapping {
    /// Mapping key, `deviceId_bitTagName`
    pub mapping_id: String,
    /// Triggering bit tag
    pub bit_tag: String,
    /// Word tag to read when the mapping fires
    pub word_tag: String,
    /// Condition under which the mapping fires
    pub condition: TriggerCondition,
}

/// Classifies Boolean transitions and fires configured mappings.
///
/// Keeps its own previous-value map, independent of the store's
/// bookkeeping, so edge state survives being queried between polls.
pub struct EdgeTriggerEngine {
    store: Arc<TagStore>,
    history: Arc<EventHistory>,
    classifier: Box<ConditionClassifier>,
    previous: parking_lot::Mutex<HashMap<String, bool>>,
    mappings: parking_lot::RwLock<HashMap<String, Vec<TriggerMapping>>>,
}

impl EdgeTriggerEngine {
    /// Create an engine with the default classifier.
    pub fn new(store: Arc<TagStore>, history: Arc<EventHistory>) -> Self {
        Self::with_classifier(store, history, default_classifier)
    }

    /// Create an engine with a custom trigger-condition classifier.
    pub fn with_classifier(
        store: Arc<TagStore>,
        history: Arc<EventHistory>,
        classifier: impl Fn(&str) -> TriggerCondition + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            history,
            classifier: Box::new(classifier),
            previous: parking_lot::Mutex::new(HashMap::new()),
            mappings: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Build the mapping table from the bit tags' declared trigger targets.
    ///
    /// Call at configuration-load time; replaces any mappings previously
    /// loaded for the device.
    pub fn load_mappings(&self, device_id: &str, tags: &[Tag]) {
        let prefix = format!("{device_id}_");
        let mut mappings = self.mappings.write();
        mappings.retain(|key, _| !key.starts_with(&prefix));

        for tag in tags.iter().filter(|t| t.is_bit() && !t.triggered_tags.is_empty()) {
            let mapping_id = trigger_key(device_id, &tag.name);
            let condition = tag
                .trigger_condition
                .unwrap_or_else(|| (self.classifier)(&tag.name));

            let entries: Vec<TriggerMapping> = tag
                .triggered_tags
                .iter()
                .map(|word_tag| TriggerMapping {
                    mapping_id: mapping_id.clone(),
                    bit_tag: tag.name.clone(),
                    word_tag: word_tag.clone(),
                    condition,
                })
                .collect();

            debug!(%mapping_id, targets = entries.len(), ?condition, "mapping loaded");
            mappings.insert(mapping_id, entries);
        }
    }

    /// Configured mappings for one bit tag.
    pub fn mappings_for(&self, device_id: &str, bit_tag: &str) -> Vec<TriggerMapping> {
        self.mappings
            .read()
            .get(&trigger_key(device_id, bit_tag))
            .cloned()
            .unwrap_or_default()
    }

    /// Process a Boolean tag change.
    ///
    /// Classifies the transition against the engine's own previous value
    /// (an unchanged value produces nothing) and fires every mapping whose
    /// condition the edge satisfies, reading the target word tag for each.
    /// Fired events are recorded into history and returned.
    pub fn process_bit_change(
        &self,
        device_id: &str,
        tag_name: &str,
        new_value: bool,
    ) -> Vec<MappingTriggeredEvent> {
        let key = trigger_key(device_id, tag_name);

        let edge = {
            let mut previous = self.previous.lock();
            let prev = previous.insert(key.clone(), new_value).unwrap_or(false);
            match (prev, new_value) {
                (false, true) => Some(Edge::Rising),
                (true, false) => Some(Edge::Falling),
                _ => None,
            }
        };

        let Some(edge) = edge else {
            return Vec::new();
        };

        let mappings = self.mappings.read().get(&key).cloned().unwrap_or_default();
        let mut events = Vec::new();

        for mapping in mappings.iter().filter(|m| m.condition.matches(edge)) {
            let Some(word_value) = self.store.read_tag(&mapping.word_tag) else {
                warn!(word_tag = %mapping.word_tag, %key, "trigger target missing from store");
                continue;
            };

            let event = MappingTriggeredEvent {
                mapping_id: mapping.mapping_id.clone(),
                bit_address_id: mapping.bit_tag.clone(),
                word_address_id: mapping.word_tag.clone(),
                word_value,
                trigger_condition: mapping.condition,
                triggered_time: Utc::now(),
            };
            self.history.record_mapping_trigger(device_id, event.clone());
            events.push(event);
        }

        events
    }
}

fn trigger_key(device_id: &str, tag_name: &str) -> String {
    format!("{device_id}_{tag_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TagDataType, TagValue, BIT_GROUP, WORD_GROUP};

    fn engine() -> EdgeTriggerEngine {
        let store = Arc::new(TagStore::new(vec![
            Tag::new("StartCMD", BIT_GROUP, TagDataType::Bool, 500)
                .triggered_tags(vec!["LotNumber".to_string()]),
            Tag::new("AlarmFlag", BIT_GROUP, TagDataType::Bool, 500)
                .triggered_tags(vec!["AlarmCode".to_string()]),
            Tag::new("LotNumber", WORD_GROUP, TagDataType::Word, 1000),
            Tag::new("AlarmCode", WORD_GROUP, TagDataType::Word, 1000),
        ]));
        store.write_tag("LotNumber", TagValue::Word(77)).unwrap();

        let engine = EdgeTriggerEngine::new(Arc::clone(&store), Arc::new(EventHistory::new()));
        engine.load_mappings("EQP1", &store.bit_tags());
        engine
    }

    #[test]
    fn test_default_classifier_rules() {
        assert_eq!(default_classifier("StartCMD"), TriggerCondition::RisingEdge);
        assert_eq!(default_classifier("LOADER_CMD"), TriggerCondition::RisingEdge);
        assert_eq!(default_classifier("AlarmFlag"), TriggerCondition::BothEdges);
        assert_eq!(default_classifier("CommErrorBit"), TriggerCondition::BothEdges);
        assert_eq!(default_classifier("Heartbeat"), TriggerCondition::RisingEdge);
    }

    #[test]
    fn test_rising_edge_fires_and_reads_word() {
        let engine = engine();

        let events = engine.process_bit_change("EQP1", "StartCMD", true);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].mapping_id, "EQP1_StartCMD");
        assert_eq!(events[0].word_address_id, "LotNumber");
        assert_eq!(events[0].word_value, TagValue::Word(77));
        assert_eq!(events[0].trigger_condition, TriggerCondition::RisingEdge);
    }

    #[test]
    fn test_same_value_never_retriggers() {
        let engine = engine();

        assert_eq!(engine.process_bit_change("EQP1", "StartCMD", true).len(), 1);
        assert!(engine.process_bit_change("EQP1", "StartCMD", true).is_empty());
        assert!(engine.process_bit_change("EQP1", "StartCMD", true).is_empty());
    }

    #[test]
    fn test_edge_sequence() {
        let engine = engine();

        // false, true, true, false: exactly two evaluations, rising then falling.
        assert!(engine.process_bit_change("EQP1", "AlarmFlag", false).is_empty());
        let rising = engine.process_bit_change("EQP1", "AlarmFlag", true);
        assert_eq!(rising.len(), 1);
        assert!(engine.process_bit_change("EQP1", "AlarmFlag", true).is_empty());
        let falling = engine.process_bit_change("EQP1", "AlarmFlag", false);
        assert_eq!(falling.len(), 1);
    }

    #[test]
    fn test_rising_only_mapping_ignores_falling() {
        let engine = engine();

        assert_eq!(engine.process_bit_change("EQP1", "StartCMD", true).len(), 1);
        // StartCMD maps to a rising-edge condition; the falling edge is silent.
        assert!(engine.process_bit_change("EQP1", "StartCMD", false).is_empty());
    }

    #[test]
    fn test_unmapped_tag_produces_nothing() {
        let engine = engine();
        assert!(engine.process_bit_change("EQP1", "UnmappedBit", true).is_empty());
    }

    #[test]
    fn test_history_records_triggers() {
        let store = Arc::new(TagStore::new(vec![
            Tag::new("StartCMD", BIT_GROUP, TagDataType::Bool, 500)
                .triggered_tags(vec!["LotNumber".to_string()]),
            Tag::new("LotNumber", WORD_GROUP, TagDataType::Word, 1000),
        ]));
        let history = Arc::new(EventHistory::new());
        let engine = EdgeTriggerEngine::new(Arc::clone(&store), Arc::clone(&history));
        engine.load_mappings("EQP1", &store.bit_tags());

        engine.process_bit_change("EQP1", "StartCMD", true);
        assert_eq!(history.mapping_triggers("EQP1").len(), 1);
    }

    #[test]
    fn test_custom_classifier() {
        let store = Arc::new(TagStore::new(vec![
            Tag::new("DoorBit", BIT_GROUP, TagDataType::Bool, 500)
                .triggered_tags(vec!["DoorState".to_string()]),
            Tag::new("DoorState", WORD_GROUP, TagDataType::Word, 1000),
        ]));
        let engine = EdgeTriggerEngine::with_classifier(
            Arc::clone(&store),
            Arc::new(EventHistory::new()),
            |_| TriggerCondition::FallingEdge,
        );
        engine.load_mappings("EQP1", &store.bit_tags());

        assert!(engine.process_bit_change("EQP1", "DoorBit", true).is_empty());
        assert_eq!(engine.process_bit_change("EQP1", "DoorBit", false).len(), 1);
    }

    #[test]
    fn test_explicit_condition_overrides_classifier() {
        let mut tag = Tag::new("StartCMD", BIT_GROUP, TagDataType::Bool, 500)
            .triggered_tags(vec!["LotNumber".to_string()]);
        tag.trigger_condition = Some(TriggerCondition::BothEdges);

        let store = Arc::new(TagStore::new(vec![
            tag,
            Tag::new("LotNumber", WORD_GROUP, TagDataType::Word, 1000),
        ]));
        let engine = EdgeTriggerEngine::new(Arc::clone(&store), Arc::new(EventHistory::new()));
        engine.load_mappings("EQP1", &store.bit_tags());

        assert_eq!(engine.process_bit_change("EQP1", "StartCMD", true).len(), 1);
        assert_eq!(engine.process_bit_change("EQP1", "StartCMD", false).len(), 1);
    }
}
