//! The node interface consumed by the engine and the observer.

use async_trait::async_trait;
use futures::stream::BoxStream;

use stakeindex_core::error::IndexerError;
use stakeindex_core::raw::{RawBlock, RawConstants, RawHeader, RawRight};

/// A stream of new heads as announced by the node.
pub type HeadStream = BoxStream<'static, Result<RawHeader, IndexerError>>;

/// Which rights to ask the node for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RightsScope {
    Level(i64),
    Cycle(i64),
}

/// Read-only access to a chain node.
///
/// Lookups of a level above the node's head return `Ok(None)`. Calls are
/// idempotent; the chain may reorganize between two of them.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn head(&self) -> Result<RawHeader, IndexerError>;

    async fn header(&self, level: i64) -> Result<Option<RawHeader>, IndexerError>;

    async fn block(&self, level: i64) -> Result<Option<RawBlock>, IndexerError>;

    /// Constants of the protocol running at `level`.
    async fn constants(&self, level: i64) -> Result<RawConstants, IndexerError>;

    /// Hex-encoded random seed of `cycle`, as known at `level`.
    async fn cycle_seed(&self, level: i64, cycle: i64) -> Result<String, IndexerError>;

    /// Round-0 baking rights. `None` when the node does not serve them.
    async fn baking_rights(&self, level: i64, scope: RightsScope) -> Result<Option<Vec<RawRight>>, IndexerError>;

    /// Attestation rights. `None` when the node does not serve them.
    async fn attestation_rights(
        &self,
        level: i64,
        scope: RightsScope,
    ) -> Result<Option<Vec<RawRight>>, IndexerError>;

    /// Full balance of `address` at `level`, own stake included. `None`
    /// when unknown.
    async fn balance(&self, level: i64, address: &str) -> Result<Option<i64>, IndexerError>;

    /// Subscribe to new heads. The stream ends when the connection drops.
    async fn monitor_heads(&self) -> Result<HeadStream, IndexerError>;
}
