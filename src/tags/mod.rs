//! Tag monitoring: value store, polling loops and edge-triggered mappings.

pub mod edge;
pub mod history;
pub mod polling;
pub mod store;

pub use edge::{default_classifier, ConditionClassifier, EdgeTriggerEngine, TriggerMapping};
pub use history::{EventHistory, DEFAULT_HISTORY_CAPACITY};
pub use polling::{PollingEngine, SimulatedSource, TagSource, DEFAULT_SCAN_RATE_MS};
pub use store::{TagChange, TagStore};
