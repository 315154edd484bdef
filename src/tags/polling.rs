//! Per-group polling loops with change detection.
//!
//! Each tag group gets one periodic task running at the group's fastest
//! configured scan rate. A tick samples every tag in the group through a
//! [`TagSource`], applies the sample to the store, and emits a
//! [`DataChangedEvent`] for every detected change. Boolean changes are
//! additionally fed into the edge-trigger engine. A tick for a group
//! cannot overlap a still-running previous tick: the group's task awaits
//! its own interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::edge::EdgeTriggerEngine;
use super::history::EventHistory;
use super::store::TagStore;
use crate::types::{ChangeType, DataChangedEvent, Tag, TagDataType, TagEvent, TagValue, BIT_GROUP};

/// Scan rate applied to groups without an explicit rate, in milliseconds.
pub const DEFAULT_SCAN_RATE_MS: u64 = 1000;

/// Supplies current values for polled tags.
///
/// Returning None means the source has no reading for the tag this tick;
/// the stored value is left untouched.
pub trait TagSource: Send + Sync {
    /// Obtain the current value of a tag.
    fn sample(&self, tag: &Tag) -> Option<TagValue>;
}

/// Deterministic pseudo-random source used when no live source is wired.
///
/// Seeded so demo deployments and tests reproduce the same value stream.
pub struct SimulatedSource {
    rng: parking_lot::Mutex<StdRng>,
}

impl SimulatedSource {
    /// Create a source with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl TagSource for SimulatedSource {
    fn sample(&self, tag: &Tag) -> Option<TagValue> {
        let mut rng = self.rng.lock();
        Some(match tag.data_type {
            TagDataType::Bool => TagValue::Bool(rng.gen_bool(0.5)),
            TagDataType::Word => TagValue::Word(rng.gen_range(0..100)),
            TagDataType::Float => TagValue::Float((rng.gen_range(0.0..100.0f64) * 10.0).round() / 10.0),
            TagDataType::Text => TagValue::Text(format!("MSG{:03}", rng.gen_range(0..1000))),
        })
    }
}

/// Runs the per-group polling loops.
pub struct PollingEngine {
    server_id: String,
    store: Arc<TagStore>,
    source: Arc<dyn TagSource>,
    edge: Arc<EdgeTriggerEngine>,
    history: Arc<EventHistory>,
    event_tx: mpsc::Sender<TagEvent>,
    event_rx: parking_lot::Mutex<Option<mpsc::Receiver<TagEvent>>>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl PollingEngine {
    /// Create an engine over a store, source and edge engine.
    pub fn new(
        server_id: impl Into<String>,
        store: Arc<TagStore>,
        source: Arc<dyn TagSource>,
        edge: Arc<EdgeTriggerEngine>,
        history: Arc<EventHistory>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_id: server_id.into(),
            store,
            source,
            edge,
            history,
            event_tx,
            event_rx: parking_lot::Mutex::new(Some(event_rx)),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Subscribe to tag events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<TagEvent>> {
        self.event_rx.lock().take()
    }

    /// Effective polling period per group.
    pub fn group_periods(&self) -> HashMap<String, Duration> {
        self.store
            .group_names()
            .into_iter()
            .map(|group| {
                let ms = self
                    .store
                    .group_min_scan_rate(&group)
                    .unwrap_or(DEFAULT_SCAN_RATE_MS);
                (group, Duration::from_millis(ms))
            })
            .collect()
    }

    /// Start one polling task per group. A second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for (group, period) in self.group_periods() {
            info!(server_id = %self.server_id, %group, period_ms = period.as_millis() as u64, "polling group started");
            tokio::spawn(poll_group_loop(
                self.server_id.clone(),
                group,
                period,
                Arc::clone(&self.store),
                Arc::clone(&self.source),
                Arc::clone(&self.edge),
                Arc::clone(&self.history),
                self.event_tx.clone(),
                self.cancel.clone(),
            ));
        }
    }

    /// Cancel all group tasks.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_group_loop(
    server_id: String,
    group: String,
    period: Duration,
    store: Arc<TagStore>,
    source: Arc<dyn TagSource>,
    edge: Arc<EdgeTriggerEngine>,
    history: Arc<EventHistory>,
    event_tx: mpsc::Sender<TagEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for name in store.tags_in_group(&group) {
            let Some(tag) = store.snapshot(&name) else { continue };
            let Some(value) = source.sample(&tag) else { continue };
            let Some(change) = store.apply_sample(&name, value) else { continue };

            let change_type = if change.group_name == BIT_GROUP {
                ChangeType::BitChange
            } else {
                ChangeType::WordChange
            };

            let event = DataChangedEvent {
                server_id: server_id.clone(),
                address: change.name.clone(),
                data_type: change.new_value.data_type(),
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
                timestamp: Utc::now(),
                change_type,
            };
            history.record_data_change(event.clone());
            if event_tx.try_send(TagEvent::DataChanged(event)).is_err() {
                debug!(%name, "data-changed event dropped");
            }

            if change_type == ChangeType::BitChange {
                if let TagValue::Bool(bit) = change.new_value {
                    for trigger in edge.process_bit_change(&server_id, &change.name, bit) {
                        if event_tx.try_send(TagEvent::MappingTriggered(trigger)).is_err() {
                            debug!(%name, "mapping-triggered event dropped");
                        }
                    }
                }
            }
        }
    }
    debug!(server_id = %server_id, %group, "polling group stopped");
}
