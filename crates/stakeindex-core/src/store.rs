//! The relational store behind the index.
//!
//! Reads are per-entity; writes happen only through [`IndexStore::commit`],
//! which applies one level's [`WriteBatch`] atomically.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::model::{
    Account, AppState, BakerCycle, BakingRight, Block, Cycle, Operation, Protocol, RightKey, SnapshotBalance,
    Statistics, SupplyTotals, SyncStatus, VotingPeriod, VotingSnapshot,
};

/// A single row change inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K, V> {
    Upsert(V),
    Delete(K),
}

/// Every mutation produced by one commit or revert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub app_state: Option<AppState>,
    pub blocks: Vec<Change<i64, Block>>,
    pub accounts: Vec<Change<i64, Account>>,
    pub protocols: Vec<Change<String, Protocol>>,
    pub cycles: Vec<Change<i64, Cycle>>,
    pub snapshot_balances: Vec<Change<(i64, i64), SnapshotBalance>>,
    pub baker_cycles: Vec<Change<(i64, i64), BakerCycle>>,
    /// Cycles whose rights are all deleted before `rights` is applied.
    pub cleared_right_cycles: Vec<i64>,
    pub rights: Vec<Change<RightKey, BakingRight>>,
    pub voting_periods: Vec<Change<i64, VotingPeriod>>,
    pub voting_snapshots: Vec<Change<(i64, i64), VotingSnapshot>>,
    pub operations: Vec<Change<i64, Operation>>,
    pub statistics: Vec<Change<i64, Statistics>>,
}

impl WriteBatch {
    /// Number of row changes, excluding the app state.
    pub fn len(&self) -> usize {
        self.blocks.len()
            + self.accounts.len()
            + self.protocols.len()
            + self.cycles.len()
            + self.snapshot_balances.len()
            + self.baker_cycles.len()
            + self.cleared_right_cycles.len()
            + self.rights.len()
            + self.voting_periods.len()
            + self.voting_snapshots.len()
            + self.operations.len()
            + self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.app_state.is_none() && self.len() == 0
    }
}

/// Storage backend for the index.
///
/// Implementations: `MemoryStore` and `SqliteStore` (in `stakeindex-storage`).
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// The checkpoint, or `None` for an empty store.
    async fn app_state(&self) -> Result<Option<AppState>, IndexerError>;

    async fn sync_status(&self) -> Result<SyncStatus, IndexerError>;

    /// Write the known-head columns without touching the checkpoint.
    async fn save_sync_status(&self, status: &SyncStatus) -> Result<(), IndexerError>;

    async fn block(&self, level: i64) -> Result<Option<Block>, IndexerError>;

    async fn account(&self, id: i64) -> Result<Option<Account>, IndexerError>;

    async fn account_by_address(&self, address: &str) -> Result<Option<Account>, IndexerError>;

    async fn baker_ids(&self) -> Result<Vec<i64>, IndexerError>;

    async fn protocol(&self, hash: &str) -> Result<Option<Protocol>, IndexerError>;

    async fn cycle(&self, index: i64) -> Result<Option<Cycle>, IndexerError>;

    async fn snapshot_balances(&self, cycle: i64) -> Result<Vec<SnapshotBalance>, IndexerError>;

    async fn baker_cycles(&self, cycle: i64) -> Result<Vec<BakerCycle>, IndexerError>;

    async fn rights_at(&self, level: i64) -> Result<Vec<BakingRight>, IndexerError>;

    async fn rights_in_cycle(&self, cycle: i64) -> Result<Vec<BakingRight>, IndexerError>;

    async fn voting_period(&self, index: i64) -> Result<Option<VotingPeriod>, IndexerError>;

    async fn voting_snapshots(&self, period: i64) -> Result<Vec<VotingSnapshot>, IndexerError>;

    async fn operations_at(&self, level: i64) -> Result<Vec<Operation>, IndexerError>;

    async fn statistics(&self, level: i64) -> Result<Option<Statistics>, IndexerError>;

    /// Sum of account balances and of bakers' external stake.
    async fn supply_totals(&self) -> Result<SupplyTotals, IndexerError>;

    /// Apply a batch atomically: either every change lands or none does.
    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError>;
}
