//! # fablink
//!
//! HSMS-style device connectivity and tag monitoring core for plant-floor
//! monitoring systems.
//!
//! The crate covers the two protocol/concurrency subsystems of such a
//! system; presentation layers, persistence and message-bus forwarding
//! consume its events through narrow channel interfaces.
//!
//! ## Device connectivity
//!
//! A [`DeviceRegistry`] owns a set of configured devices. Each device
//! connects over a framed TCP protocol in one of two roles: Client (one
//! outbound socket) or Server (a listener plus any number of accepted
//! clients, with broadcast sends). Frames are a fixed 10-byte header plus
//! ASCII content, identified by a (stream, function) pair such as S6F11.
//!
//! ```rust,ignore
//! use fablink::{DeviceConfig, DeviceRegistry, RegistryConfig, Role};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = DeviceRegistry::new(RegistryConfig::default());
//!     let mut events = registry.subscribe().unwrap();
//!
//!     registry.add_device(DeviceConfig::new("EQP1", "Etcher 1", Role::Server, "0.0.0.0", 5000));
//!     registry.connect_device("EQP1").await;
//!
//!     registry.send_shorthand("EQP1", "S6F11:EVENT_REPORT_SEND", true, 5000, 2).await;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```
//!
//! ## Tag monitoring
//!
//! A [`TagStore`] holds current/previous values for grouped tags. The
//! [`PollingEngine`] runs one periodic task per group at the group's scan
//! rate, detecting value changes; Boolean changes feed the
//! [`EdgeTriggerEngine`], which fires configured bit→word mappings on
//! rising/falling edges. Both event kinds land in a bounded per-server
//! [`EventHistory`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fablink::{EdgeTriggerEngine, EventHistory, PollingEngine, SimulatedSource, TagStore};
//!
//! let store = Arc::new(TagStore::new(tags));
//! let history = Arc::new(EventHistory::new());
//! let edge = Arc::new(EdgeTriggerEngine::new(store.clone(), history.clone()));
//! edge.load_mappings("SIM1", &store.bit_tags());
//!
//! let engine = PollingEngine::new("SIM1", store, Arc::new(SimulatedSource::new(7)), edge, history);
//! let mut events = engine.subscribe().unwrap();
//! engine.start();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod connection;
pub mod error;
pub mod registry;
pub mod tags;
pub mod types;

// Re-export main types
pub use codec::{decode_frame, encode_frame, parse_shorthand, HsmsCodec};
pub use connection::{
    ConnectionEvent, DeviceConnection, SendReport, DEFAULT_SEND_RETRIES, DEFAULT_SEND_TIMEOUT_MS,
};
pub use error::{LinkError, Result};
pub use registry::DeviceRegistry;
pub use tags::{
    default_classifier, EdgeTriggerEngine, EventHistory, PollingEngine, SimulatedSource,
    TagSource, TagStore,
};
pub use types::*;
