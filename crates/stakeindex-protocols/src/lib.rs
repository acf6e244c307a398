//! stakeindex-protocols — per-protocol commit pipelines and the replay
//! engine.
//!
//! A [`ProtocolHandler`] is an ordered list of [`CommitStage`]s, a table of
//! [`OperationHandler`]s and a [`Migration`]. Versions share stage objects
//! and differ in the operations they accept, their rounding table and
//! their migration. The [`Engine`] resolves a handler per block through the
//! [`ProtocolRegistry`] and flushes each level atomically.
//!
//! # Example
//!
//! ```rust,ignore
//! use stakeindex_protocols::{Engine, EngineOptions, ProtocolRegistry};
//!
//! let registry = ProtocolRegistry::from_entries(&settings.protocols, None)?;
//! let mut engine = Engine::open(store, node, Arc::new(registry), EngineOptions::default()).await?;
//! engine.commit(&block).await?;
//! ```

pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod handler;
pub mod operations;
pub mod registry;
pub mod rewards;
pub mod rights;
pub mod rounding;
pub mod stages;
pub mod validator;
pub mod versions;

pub use context::LevelContext;
pub use engine::{Engine, EngineOptions};
pub use handler::{CommitStage, Migration, OperationHandler, ProtocolHandler, StageOutcome};
pub use registry::ProtocolRegistry;
pub use rounding::{Rounding, RoundingTable};
