//! In-memory storage backend.
//!
//! Keeps every table in ordered maps behind one mutex, so a batch is applied
//! atomically and [`MemoryStore::dump`] yields a deterministic snapshot that
//! tests compare for equality.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{
    Account, AppState, BakerCycle, BakingRight, Block, Cycle, Operation, Protocol, RightKey, SnapshotBalance,
    Statistics, SupplyTotals, SyncStatus, VotingPeriod, VotingSnapshot,
};
use stakeindex_core::store::{Change, IndexStore, WriteBatch};

/// Every table of the index. Sync status is excluded: it changes on its own
/// schedule and is not part of a level's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDump {
    pub app_state: Option<AppState>,
    pub blocks: BTreeMap<i64, Block>,
    pub accounts: BTreeMap<i64, Account>,
    pub protocols: BTreeMap<String, Protocol>,
    pub cycles: BTreeMap<i64, Cycle>,
    pub snapshot_balances: BTreeMap<(i64, i64), SnapshotBalance>,
    pub baker_cycles: BTreeMap<(i64, i64), BakerCycle>,
    pub rights: BTreeMap<RightKey, BakingRight>,
    pub voting_periods: BTreeMap<i64, VotingPeriod>,
    pub voting_snapshots: BTreeMap<(i64, i64), VotingSnapshot>,
    pub operations: BTreeMap<i64, Operation>,
    pub statistics: BTreeMap<i64, Statistics>,
}

impl StoreDump {
    /// Tables that differ from `other`, by name.
    pub fn diff(&self, other: &StoreDump) -> Vec<&'static str> {
        let mut out = Vec::new();
        macro_rules! cmp {
            ($($field:ident),*) => {
                $(if self.$field != other.$field { out.push(stringify!($field)); })*
            };
        }
        cmp!(
            app_state,
            blocks,
            accounts,
            protocols,
            cycles,
            snapshot_balances,
            baker_cycles,
            rights,
            voting_periods,
            voting_snapshots,
            operations,
            statistics
        );
        out
    }
}

fn apply<K: Ord, V>(table: &mut BTreeMap<K, V>, changes: Vec<Change<K, V>>, key: impl Fn(&V) -> K) {
    for change in changes {
        match change {
            Change::Upsert(v) => {
                table.insert(key(&v), v);
            }
            Change::Delete(k) => {
                table.remove(&k);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    tables: StoreDump,
    sync: SyncStatus,
    failing_commits: u32,
}

/// In-memory index store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every table.
    pub fn dump(&self) -> StoreDump {
        self.inner.lock().unwrap().tables.clone()
    }

    /// An independent store holding a copy of this one's tables.
    pub fn fork(&self) -> Self {
        let inner = self.inner.lock().unwrap();
        Self {
            inner: Mutex::new(Inner {
                tables: inner.tables.clone(),
                sync: inner.sync.clone(),
                failing_commits: 0,
            }),
        }
    }

    /// Make the next `n` commits fail with a storage error (fault injection
    /// for tests).
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.lock().unwrap().failing_commits = n;
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn app_state(&self) -> Result<Option<AppState>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.app_state.clone())
    }

    async fn sync_status(&self) -> Result<SyncStatus, IndexerError> {
        Ok(self.inner.lock().unwrap().sync.clone())
    }

    async fn save_sync_status(&self, status: &SyncStatus) -> Result<(), IndexerError> {
        self.inner.lock().unwrap().sync = status.clone();
        Ok(())
    }

    async fn block(&self, level: i64) -> Result<Option<Block>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.blocks.get(&level).cloned())
    }

    async fn account(&self, id: i64) -> Result<Option<Account>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.accounts.get(&id).cloned())
    }

    async fn account_by_address(&self, address: &str) -> Result<Option<Account>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .accounts
            .values()
            .find(|a| a.address == address)
            .cloned())
    }

    async fn baker_ids(&self) -> Result<Vec<i64>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .accounts
            .values()
            .filter(|a| a.is_baker())
            .map(|a| a.id)
            .collect())
    }

    async fn protocol(&self, hash: &str) -> Result<Option<Protocol>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.protocols.get(hash).cloned())
    }

    async fn cycle(&self, index: i64) -> Result<Option<Cycle>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.cycles.get(&index).cloned())
    }

    async fn snapshot_balances(&self, cycle: i64) -> Result<Vec<SnapshotBalance>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .snapshot_balances
            .range((cycle, i64::MIN)..=(cycle, i64::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn baker_cycles(&self, cycle: i64) -> Result<Vec<BakerCycle>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .baker_cycles
            .range((cycle, i64::MIN)..=(cycle, i64::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn rights_at(&self, level: i64) -> Result<Vec<BakingRight>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .rights
            .values()
            .filter(|r| r.level == level)
            .cloned()
            .collect())
    }

    async fn rights_in_cycle(&self, cycle: i64) -> Result<Vec<BakingRight>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .rights
            .values()
            .filter(|r| r.cycle == cycle)
            .cloned()
            .collect())
    }

    async fn voting_period(&self, index: i64) -> Result<Option<VotingPeriod>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.voting_periods.get(&index).cloned())
    }

    async fn voting_snapshots(&self, period: i64) -> Result<Vec<VotingSnapshot>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .voting_snapshots
            .range((period, i64::MIN)..=(period, i64::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn operations_at(&self, level: i64) -> Result<Vec<Operation>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tables
            .operations
            .values()
            .filter(|op| op.level == level)
            .cloned()
            .collect())
    }

    async fn statistics(&self, level: i64) -> Result<Option<Statistics>, IndexerError> {
        Ok(self.inner.lock().unwrap().tables.statistics.get(&level).cloned())
    }

    async fn supply_totals(&self) -> Result<SupplyTotals, IndexerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tables
            .accounts
            .values()
            .fold(SupplyTotals::default(), |acc, a| SupplyTotals {
                balances: acc.balances + a.balance,
                external_staked: acc.external_staked + a.external_staked_balance,
            }))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            return Err(IndexerError::Storage("injected commit failure".into()));
        }
        let t = &mut inner.tables;
        if let Some(state) = batch.app_state {
            t.app_state = Some(state);
        }
        apply(&mut t.blocks, batch.blocks, |b| b.level);
        apply(&mut t.accounts, batch.accounts, |a| a.id);
        apply(&mut t.protocols, batch.protocols, |p| p.hash.clone());
        apply(&mut t.cycles, batch.cycles, |c| c.index);
        apply(&mut t.snapshot_balances, batch.snapshot_balances, |s| (s.cycle, s.baker_id));
        apply(&mut t.baker_cycles, batch.baker_cycles, |bc| (bc.cycle, bc.baker_id));
        for cycle in &batch.cleared_right_cycles {
            t.rights.retain(|_, r| r.cycle != *cycle);
        }
        apply(&mut t.rights, batch.rights, |r| r.key());
        apply(&mut t.voting_periods, batch.voting_periods, |p| p.index);
        apply(&mut t.voting_snapshots, batch.voting_snapshots, |s| (s.period, s.baker_id));
        apply(&mut t.operations, batch.operations, |op| op.id);
        apply(&mut t.statistics, batch.statistics, |s| s.level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::model::{AccountKind, RightStatus};

    fn baker(id: i64, balance: i64) -> Account {
        Account {
            kind: AccountKind::Baker,
            balance,
            external_staked_balance: 7,
            delegate_id: Some(id),
            ..Account::new_user(id, format!("tz1b{id}"), 1)
        }
    }

    #[tokio::test]
    async fn commit_applies_upserts_and_deletes() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::default();
        batch.accounts.push(Change::Upsert(baker(1, 100)));
        batch.accounts.push(Change::Upsert(Account::new_user(2, "tz1u", 3)));
        store.commit(batch).await.unwrap();

        assert_eq!(store.baker_ids().await.unwrap(), vec![1]);
        assert_eq!(store.account_by_address("tz1u").await.unwrap().unwrap().id, 2);
        assert_eq!(
            store.supply_totals().await.unwrap(),
            SupplyTotals {
                balances: 100,
                external_staked: 7
            }
        );

        let mut batch = WriteBatch::default();
        batch.accounts.push(Change::Delete(2));
        store.commit(batch).await.unwrap();
        assert!(store.account(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleared_cycles_go_before_new_rights() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::default();
        batch.rights.push(Change::Upsert(BakingRight::baking(3, 20, 0, 1, RightStatus::Future)));
        batch.rights.push(Change::Upsert(BakingRight::baking(3, 21, 0, 1, RightStatus::Future)));
        batch.rights.push(Change::Upsert(BakingRight::baking(4, 30, 0, 1, RightStatus::Future)));
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::default();
        batch.cleared_right_cycles.push(3);
        batch.rights.push(Change::Upsert(BakingRight::baking(3, 22, 0, 2, RightStatus::Future)));
        store.commit(batch).await.unwrap();

        let rights = store.rights_in_cycle(3).await.unwrap();
        assert_eq!(rights.len(), 1);
        assert_eq!(rights[0].level, 22);
        assert_eq!(store.rights_in_cycle(4).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let batch = WriteBatch {
            app_state: Some(AppState::initial()),
            ..Default::default()
        };
        let err = store.commit(batch.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.app_state().await.unwrap().is_none());
        store.commit(batch).await.unwrap();
        assert!(store.app_state().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fork_is_independent() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::default();
        batch.accounts.push(Change::Upsert(baker(1, 100)));
        store.commit(batch).await.unwrap();

        let copy = store.fork();
        let mut batch = WriteBatch::default();
        batch.accounts.push(Change::Delete(1));
        copy.commit(batch).await.unwrap();

        assert_eq!(store.dump().diff(&copy.dump()), vec!["accounts"]);
        assert!(store.account(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sync_status_is_separate_from_tables() {
        let store = MemoryStore::new();
        let before = store.dump();
        store
            .save_sync_status(&SyncStatus {
                known_head: 42,
                known_hash: "B42".into(),
                last_sync: None,
            })
            .await
            .unwrap();
        assert_eq!(store.dump(), before);
        assert_eq!(store.sync_status().await.unwrap().known_head, 42);
    }
}
