//! stakeindex-core — entities, node payloads and storage contracts for the
//! StakeIndex replay engine.
//!
//! # Architecture
//!
//! ```text
//! ObserverBuilder → Observer
//!                      ├── HeadNotifier      (polling / streaming remote head)
//!                      ├── reconcile::decide (advance vs rebase)
//!                      ├── Engine            (commit / revert one level)
//!                      │     ├── ProtocolRegistry → ProtocolHandler → stages
//!                      │     └── EntityCache → WriteBatch
//!                      ├── StatusSync        (known head columns)
//!                      └── IndexStore        (memory / SQLite)
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod raw;
pub mod reconcile;
pub mod store;

pub use cache::EntityCache;
pub use config::{LogConfig, ProtocolEntry, ProtocolVersion, Settings};
pub use error::IndexerError;
pub use raw::{RawBlock, RawConstants, RawHeader, RawOperation, RawRight};
pub use reconcile::{Decision, LocalHead, RebaseReason};
pub use store::{Change, IndexStore, WriteBatch};
