//! Shared tag-value store.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::{LinkError, Result};
use crate::types::{Tag, TagValue};

/// A detected change on one tag, produced under the store lock so the
/// compare-and-update is atomic per tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagChange {
    /// Tag name
    pub name: String,
    /// Owning group
    pub group_name: String,
    /// Value before the change
    pub old_value: TagValue,
    /// Value after the change
    pub new_value: TagValue,
}

/// Holds current and previous values for every configured tag.
///
/// Safe under concurrent access from the group polling tasks and the
/// read/write API; every compound read-modify-write happens under one
/// write lock.
pub struct TagStore {
    tags: parking_lot::RwLock<HashMap<String, Tag>>,
}

impl TagStore {
    /// Build a store from configured tags.
    pub fn new(tags: Vec<Tag>) -> Self {
        Self {
            tags: parking_lot::RwLock::new(
                tags.into_iter().map(|t| (t.name.clone(), t)).collect(),
            ),
        }
    }

    /// Add or replace a tag definition.
    pub fn insert(&self, tag: Tag) {
        self.tags.write().insert(tag.name.clone(), tag);
    }

    /// Current value of a tag.
    pub fn read_tag(&self, name: &str) -> Option<TagValue> {
        self.tags.read().get(name).map(|t| t.current_value.clone())
    }

    /// Current values for a list of tags; missing names map to None.
    pub fn read_tags(&self, names: &[&str]) -> Vec<(String, Option<TagValue>)> {
        let tags = self.tags.read();
        names
            .iter()
            .map(|n| (n.to_string(), tags.get(*n).map(|t| t.current_value.clone())))
            .collect()
    }

    /// Full snapshot of one tag definition.
    pub fn snapshot(&self, name: &str) -> Option<Tag> {
        self.tags.read().get(name).cloned()
    }

    /// Write a value from the external API.
    ///
    /// Participates in change detection exactly like a polled sample:
    /// the previous value and change stamp are updated on an actual change.
    /// Returns whether the value changed.
    pub fn write_tag(&self, name: &str, value: TagValue) -> Result<bool> {
        let mut tags = self.tags.write();
        let tag = tags
            .get_mut(name)
            .ok_or_else(|| LinkError::UnknownTag(name.to_string()))?;

        if tag.current_value == value {
            return Ok(false);
        }
        tag.previous_value = std::mem::replace(&mut tag.current_value, value);
        tag.last_changed = Some(Utc::now());
        Ok(true)
    }

    /// Apply a polled sample; returns the change when `current != previous`.
    pub fn apply_sample(&self, name: &str, value: TagValue) -> Option<TagChange> {
        let mut tags = self.tags.write();
        let tag = tags.get_mut(name)?;

        if tag.current_value == value {
            return None;
        }

        let old_value = std::mem::replace(&mut tag.current_value, value.clone());
        tag.previous_value = old_value.clone();
        tag.last_changed = Some(Utc::now());

        Some(TagChange {
            name: tag.name.clone(),
            group_name: tag.group_name.clone(),
            old_value,
            new_value: value,
        })
    }

    /// Names of all groups with at least one tag.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tags
            .read()
            .values()
            .map(|t| t.group_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Tag names belonging to a group.
    pub fn tags_in_group(&self, group_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .tags
            .read()
            .values()
            .filter(|t| t.group_name == group_name)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Minimum configured scan rate in a group, ignoring unset (zero)
    /// rates; None when the group has no explicit rate.
    pub fn group_min_scan_rate(&self, group_name: &str) -> Option<u64> {
        self.tags
            .read()
            .values()
            .filter(|t| t.group_name == group_name && t.scan_rate_ms > 0)
            .map(|t| t.scan_rate_ms)
            .min()
    }

    /// Snapshot of every tag whose group is the Boolean trigger group.
    pub fn bit_tags(&self) -> Vec<Tag> {
        self.tags
            .read()
            .values()
            .filter(|t| t.is_bit())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TagDataType, BIT_GROUP, WORD_GROUP};

    fn store() -> TagStore {
        TagStore::new(vec![
            Tag::new("StartCMD", BIT_GROUP, TagDataType::Bool, 500),
            Tag::new("AlarmFlag", BIT_GROUP, TagDataType::Bool, 200),
            Tag::new("LotNumber", WORD_GROUP, TagDataType::Word, 1000),
        ])
    }

    #[test]
    fn test_read_write_roundtrip() {
        let store = store();
        assert_eq!(store.read_tag("LotNumber"), Some(TagValue::Word(0)));

        assert!(store.write_tag("LotNumber", TagValue::Word(42)).unwrap());
        assert_eq!(store.read_tag("LotNumber"), Some(TagValue::Word(42)));

        let tag = store.snapshot("LotNumber").unwrap();
        assert_eq!(tag.previous_value, TagValue::Word(0));
        assert!(tag.last_changed.is_some());

        // Writing the same value again is not a change.
        assert!(!store.write_tag("LotNumber", TagValue::Word(42)).unwrap());
    }

    #[test]
    fn test_write_unknown_tag() {
        let store = store();
        assert!(matches!(
            store.write_tag("Missing", TagValue::Word(1)),
            Err(LinkError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_apply_sample_detects_change() {
        let store = store();
        assert!(store.apply_sample("StartCMD", TagValue::Bool(false)).is_none());

        let change = store.apply_sample("StartCMD", TagValue::Bool(true)).unwrap();
        assert_eq!(change.old_value, TagValue::Bool(false));
        assert_eq!(change.new_value, TagValue::Bool(true));
        assert_eq!(change.group_name, BIT_GROUP);

        assert!(store.apply_sample("StartCMD", TagValue::Bool(true)).is_none());
    }

    #[test]
    fn test_group_queries() {
        let store = store();
        assert_eq!(store.group_names(), vec!["Bit", "Word"]);
        assert_eq!(store.tags_in_group(BIT_GROUP), vec!["AlarmFlag", "StartCMD"]);
        assert_eq!(store.group_min_scan_rate(BIT_GROUP), Some(200));
        assert_eq!(store.group_min_scan_rate("Empty"), None);
        assert_eq!(store.bit_tags().len(), 2);
    }

    #[test]
    fn test_read_tags_missing_name() {
        let store = store();
        let values = store.read_tags(&["LotNumber", "Missing"]);
        assert_eq!(values[0].1, Some(TagValue::Word(0)));
        assert_eq!(values[1].1, None);
    }
}
