//! Bounded per-server event history.

use std::collections::{HashMap, VecDeque};

use crate::types::{DataChangedEvent, MappingTriggeredEvent};

/// Default maximum retained events per server and kind.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

struct HistoryInner {
    capacity: usize,
    data_changes: HashMap<String, VecDeque<DataChangedEvent>>,
    mapping_triggers: HashMap<String, VecDeque<MappingTriggeredEvent>>,
}

/// Per-server history of data-change and mapping-trigger events.
///
/// Each server's list is capped; the oldest entry is evicted first. One
/// guard covers recording, reading and clearing, and reads hand out
/// snapshot copies.
pub struct EventHistory {
    inner: parking_lot::Mutex<HistoryInner>,
}

impl EventHistory {
    /// Create a history with the default per-server capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a history with a custom per-server capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: parking_lot::Mutex::new(HistoryInner {
                capacity,
                data_changes: HashMap::new(),
                mapping_triggers: HashMap::new(),
            }),
        }
    }

    /// Append a data-change event to its server's list.
    pub fn record_data_change(&self, event: DataChangedEvent) {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;
        let list = inner
            .data_changes
            .entry(event.server_id.clone())
            .or_default();
        list.push_back(event);
        while list.len() > capacity {
            list.pop_front();
        }
    }

    /// Append a mapping-trigger event under the given server id.
    pub fn record_mapping_trigger(&self, server_id: &str, event: MappingTriggeredEvent) {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;
        let list = inner
            .mapping_triggers
            .entry(server_id.to_string())
            .or_default();
        list.push_back(event);
        while list.len() > capacity {
            list.pop_front();
        }
    }

    /// Snapshot of a server's data-change history, oldest first.
    pub fn data_changes(&self, server_id: &str) -> Vec<DataChangedEvent> {
        self.inner
            .lock()
            .data_changes
            .get(server_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a server's mapping-trigger history, oldest first.
    pub fn mapping_triggers(&self, server_id: &str) -> Vec<MappingTriggeredEvent> {
        self.inner
            .lock()
            .mapping_triggers
            .get(server_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop both histories for one server.
    pub fn clear(&self, server_id: &str) {
        let mut inner = self.inner.lock();
        inner.data_changes.remove(server_id);
        inner.mapping_triggers.remove(server_id);
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new()
    }
}
