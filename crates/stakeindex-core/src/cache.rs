//! Read-through cache of the entities touched while applying a level.
//!
//! Commit logic reads rows through the cache, mutates clones and puts them
//! back. Nothing reaches the store until [`EntityCache::take_changes`] turns
//! the dirty and removed rows into one [`WriteBatch`]. After a failed level
//! the whole cache is [`reset`](EntityCache::reset), since its rows may no
//! longer match the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::RangeInclusive;

use crate::error::IndexerError;
use crate::model::{
    Account, AppState, BakerCycle, BakingRight, Block, Cycle, Operation, Protocol, RightKey, RightKind,
    SnapshotBalance, Statistics, VotingPeriod, VotingSnapshot,
};
use crate::store::{Change, IndexStore, WriteBatch};

/// Rows kept across levels before the cache is emptied.
pub const DEFAULT_CAPACITY: usize = 200_000;

// ─── Table ────────────────────────────────────────────────────────────────────

/// Result of looking a key up in a [`Table`].
#[derive(Debug, PartialEq)]
pub enum Lookup<'a, V> {
    Hit(&'a V),
    /// Deleted in this level; the store copy must be ignored.
    Removed,
    Miss,
}

/// Working copies of one entity kind.
#[derive(Debug)]
pub struct Table<K, V> {
    rows: BTreeMap<K, V>,
    dirty: BTreeSet<K>,
    removed: BTreeSet<K>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    pub fn lookup(&self, key: &K) -> Lookup<'_, V> {
        if self.removed.contains(key) {
            return Lookup::Removed;
        }
        match self.rows.get(key) {
            Some(v) => Lookup::Hit(v),
            None => Lookup::Miss,
        }
    }

    /// Insert a row as read from the store. Rows already cached or removed
    /// in this level win.
    pub fn load(&mut self, key: K, value: V) {
        if self.removed.contains(&key) {
            return;
        }
        self.rows.entry(key).or_insert(value);
    }

    pub fn put(&mut self, key: K, value: V) {
        self.removed.remove(&key);
        self.dirty.insert(key.clone());
        self.rows.insert(key, value);
    }

    pub fn remove(&mut self, key: &K) {
        self.rows.remove(key);
        self.dirty.remove(key);
        self.removed.insert(key.clone());
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }

    pub fn range(&self, range: RangeInclusive<K>) -> impl Iterator<Item = &V> {
        self.rows.range(range).map(|(_, v)| v)
    }

    /// Drop cached rows matching `pred` without recording a change.
    pub fn forget_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) {
        let doomed: Vec<K> = self
            .rows
            .iter()
            .filter(|(k, v)| pred(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            self.rows.remove(&k);
            self.dirty.remove(&k);
        }
    }

    pub fn take_changes(&mut self) -> Vec<Change<K, V>> {
        let mut changes = Vec::with_capacity(self.dirty.len() + self.removed.len());
        for k in std::mem::take(&mut self.removed) {
            changes.push(Change::Delete(k));
        }
        for k in std::mem::take(&mut self.dirty) {
            if let Some(v) = self.rows.get(&k) {
                changes.push(Change::Upsert(v.clone()));
            }
        }
        changes
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.dirty.clear();
        self.removed.clear();
    }
}

/// A table whose rows are loaded from the store a group at a time.
#[derive(Debug)]
pub struct Grouped<K, V> {
    table: Table<K, V>,
    loaded: HashSet<i64>,
}

impl<K, V> Default for Grouped<K, V> {
    fn default() -> Self {
        Self {
            table: Table::default(),
            loaded: HashSet::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Grouped<K, V> {
    pub fn is_loaded(&self, group: i64) -> bool {
        self.loaded.contains(&group)
    }

    pub fn mark_loaded(&mut self, group: i64) {
        self.loaded.insert(group);
    }

    fn clear(&mut self) {
        self.table.clear();
        self.loaded.clear();
    }
}

// ─── EntityCache ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EntityCache {
    blocks: Table<i64, Block>,
    accounts: Table<i64, Account>,
    addresses: HashMap<String, i64>,
    bakers_loaded: bool,
    protocols: Table<String, Protocol>,
    cycles: Table<i64, Cycle>,
    snapshots: Grouped<(i64, i64), SnapshotBalance>,
    baker_cycles: Grouped<(i64, i64), BakerCycle>,
    rights: Grouped<RightKey, BakingRight>,
    cleared_right_cycles: Vec<i64>,
    periods: Table<i64, VotingPeriod>,
    voting_snapshots: Grouped<(i64, i64), VotingSnapshot>,
    operations: Grouped<i64, Operation>,
    statistics: Table<i64, Statistics>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    pub async fn block(&mut self, store: &dyn IndexStore, level: i64) -> Result<Option<Block>, IndexerError> {
        match self.blocks.lookup(&level) {
            Lookup::Hit(b) => return Ok(Some(b.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.block(level).await?;
        if let Some(b) = &loaded {
            self.blocks.load(level, b.clone());
        }
        Ok(loaded)
    }

    pub fn put_block(&mut self, block: Block) {
        self.blocks.put(block.level, block);
    }

    pub fn remove_block(&mut self, level: i64) {
        self.blocks.remove(&level);
    }

    // ─── Accounts ────────────────────────────────────────────────────────────

    pub async fn account(&mut self, store: &dyn IndexStore, id: i64) -> Result<Option<Account>, IndexerError> {
        match self.accounts.lookup(&id) {
            Lookup::Hit(a) => return Ok(Some(a.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.account(id).await?;
        if let Some(a) = &loaded {
            self.addresses.insert(a.address.clone(), a.id);
            self.accounts.load(id, a.clone());
        }
        Ok(loaded)
    }

    pub async fn account_by_address(
        &mut self,
        store: &dyn IndexStore,
        address: &str,
    ) -> Result<Option<Account>, IndexerError> {
        if let Some(id) = self.addresses.get(address).copied() {
            if let Lookup::Hit(a) = self.accounts.lookup(&id) {
                return Ok(Some(a.clone()));
            }
        }
        let Some(a) = store.account_by_address(address).await? else {
            return Ok(None);
        };
        match self.accounts.lookup(&a.id) {
            Lookup::Removed => Ok(None),
            Lookup::Hit(cached) => Ok(Some(cached.clone())),
            Lookup::Miss => {
                self.addresses.insert(a.address.clone(), a.id);
                self.accounts.load(a.id, a.clone());
                Ok(Some(a))
            }
        }
    }

    /// Ids of every baker, ascending.
    pub async fn baker_ids(&mut self, store: &dyn IndexStore) -> Result<Vec<i64>, IndexerError> {
        if !self.bakers_loaded {
            for id in store.baker_ids().await? {
                self.account(store, id).await?;
            }
            self.bakers_loaded = true;
        }
        Ok(self.accounts.values().filter(|a| a.is_baker()).map(|a| a.id).collect())
    }

    pub fn put_account(&mut self, account: Account) {
        self.addresses.insert(account.address.clone(), account.id);
        self.accounts.put(account.id, account);
    }

    pub fn remove_account(&mut self, id: i64) {
        if let Lookup::Hit(a) = self.accounts.lookup(&id) {
            self.addresses.remove(&a.address);
        }
        self.accounts.remove(&id);
    }

    // ─── Protocols ───────────────────────────────────────────────────────────

    pub async fn protocol(&mut self, store: &dyn IndexStore, hash: &str) -> Result<Option<Protocol>, IndexerError> {
        let key = hash.to_string();
        match self.protocols.lookup(&key) {
            Lookup::Hit(p) => return Ok(Some(p.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.protocol(hash).await?;
        if let Some(p) = &loaded {
            self.protocols.load(key, p.clone());
        }
        Ok(loaded)
    }

    pub fn put_protocol(&mut self, protocol: Protocol) {
        self.protocols.put(protocol.hash.clone(), protocol);
    }

    pub fn remove_protocol(&mut self, hash: &str) {
        self.protocols.remove(&hash.to_string());
    }

    // ─── Cycles ──────────────────────────────────────────────────────────────

    pub async fn cycle(&mut self, store: &dyn IndexStore, index: i64) -> Result<Option<Cycle>, IndexerError> {
        match self.cycles.lookup(&index) {
            Lookup::Hit(c) => return Ok(Some(c.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.cycle(index).await?;
        if let Some(c) = &loaded {
            self.cycles.load(index, c.clone());
        }
        Ok(loaded)
    }

    pub fn put_cycle(&mut self, cycle: Cycle) {
        self.cycles.put(cycle.index, cycle);
    }

    pub fn remove_cycle(&mut self, index: i64) {
        self.cycles.remove(&index);
    }

    // ─── Snapshot balances ───────────────────────────────────────────────────

    pub async fn snapshot_balances(
        &mut self,
        store: &dyn IndexStore,
        cycle: i64,
    ) -> Result<Vec<SnapshotBalance>, IndexerError> {
        if !self.snapshots.is_loaded(cycle) {
            for s in store.snapshot_balances(cycle).await? {
                self.snapshots.table.load((s.cycle, s.baker_id), s);
            }
            self.snapshots.mark_loaded(cycle);
        }
        Ok(self
            .snapshots
            .table
            .range((cycle, i64::MIN)..=(cycle, i64::MAX))
            .cloned()
            .collect())
    }

    pub fn put_snapshot_balance(&mut self, snapshot: SnapshotBalance) {
        self.snapshots.table.put((snapshot.cycle, snapshot.baker_id), snapshot);
    }

    pub fn remove_snapshot_balance(&mut self, cycle: i64, baker_id: i64) {
        self.snapshots.table.remove(&(cycle, baker_id));
    }

    // ─── Baker cycles ────────────────────────────────────────────────────────

    async fn ensure_baker_cycles(&mut self, store: &dyn IndexStore, cycle: i64) -> Result<(), IndexerError> {
        if !self.baker_cycles.is_loaded(cycle) {
            for bc in store.baker_cycles(cycle).await? {
                self.baker_cycles.table.load((bc.cycle, bc.baker_id), bc);
            }
            self.baker_cycles.mark_loaded(cycle);
        }
        Ok(())
    }

    pub async fn baker_cycles(&mut self, store: &dyn IndexStore, cycle: i64) -> Result<Vec<BakerCycle>, IndexerError> {
        self.ensure_baker_cycles(store, cycle).await?;
        Ok(self
            .baker_cycles
            .table
            .range((cycle, i64::MIN)..=(cycle, i64::MAX))
            .cloned()
            .collect())
    }

    pub async fn baker_cycle(
        &mut self,
        store: &dyn IndexStore,
        cycle: i64,
        baker_id: i64,
    ) -> Result<Option<BakerCycle>, IndexerError> {
        self.ensure_baker_cycles(store, cycle).await?;
        Ok(match self.baker_cycles.table.lookup(&(cycle, baker_id)) {
            Lookup::Hit(bc) => Some(bc.clone()),
            _ => None,
        })
    }

    pub fn put_baker_cycle(&mut self, bc: BakerCycle) {
        self.baker_cycles.table.put((bc.cycle, bc.baker_id), bc);
    }

    pub fn remove_baker_cycle(&mut self, cycle: i64, baker_id: i64) {
        self.baker_cycles.table.remove(&(cycle, baker_id));
    }

    // ─── Rights ──────────────────────────────────────────────────────────────

    fn level_range(level: i64) -> RangeInclusive<RightKey> {
        RightKey {
            level,
            kind: RightKind::Baking,
            slot: i64::MIN,
        }..=RightKey {
            level,
            kind: RightKind::Attestation,
            slot: i64::MAX,
        }
    }

    pub async fn rights_at(&mut self, store: &dyn IndexStore, level: i64) -> Result<Vec<BakingRight>, IndexerError> {
        if !self.rights.is_loaded(level) {
            for r in store.rights_at(level).await? {
                self.rights.table.load(r.key(), r);
            }
            self.rights.mark_loaded(level);
        }
        Ok(self.rights.table.range(Self::level_range(level)).cloned().collect())
    }

    pub async fn right(&mut self, store: &dyn IndexStore, key: RightKey) -> Result<Option<BakingRight>, IndexerError> {
        self.rights_at(store, key.level).await?;
        Ok(match self.rights.table.lookup(&key) {
            Lookup::Hit(r) => Some(r.clone()),
            _ => None,
        })
    }

    /// Declare that the store holds no rights for these levels beyond what
    /// is put through the cache (used for freshly generated cycles).
    pub fn mark_rights_loaded(&mut self, levels: RangeInclusive<i64>) {
        for level in levels {
            self.rights.mark_loaded(level);
        }
    }

    pub fn put_right(&mut self, right: BakingRight) {
        self.rights.table.put(right.key(), right);
    }

    pub fn remove_right(&mut self, key: RightKey) {
        self.rights.table.remove(&key);
    }

    /// Delete every right of `cycle`, whose rows span `levels`.
    pub fn clear_cycle_rights(&mut self, cycle: i64, levels: RangeInclusive<i64>) {
        self.rights.table.forget_where(|_, r| r.cycle == cycle);
        self.cleared_right_cycles.push(cycle);
        self.mark_rights_loaded(levels);
    }

    // ─── Voting ──────────────────────────────────────────────────────────────

    pub async fn voting_period(
        &mut self,
        store: &dyn IndexStore,
        index: i64,
    ) -> Result<Option<VotingPeriod>, IndexerError> {
        match self.periods.lookup(&index) {
            Lookup::Hit(p) => return Ok(Some(p.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.voting_period(index).await?;
        if let Some(p) = &loaded {
            self.periods.load(index, p.clone());
        }
        Ok(loaded)
    }

    pub fn put_voting_period(&mut self, period: VotingPeriod) {
        self.periods.put(period.index, period);
    }

    pub fn remove_voting_period(&mut self, index: i64) {
        self.periods.remove(&index);
    }

    pub async fn voting_snapshots(
        &mut self,
        store: &dyn IndexStore,
        period: i64,
    ) -> Result<Vec<VotingSnapshot>, IndexerError> {
        if !self.voting_snapshots.is_loaded(period) {
            for s in store.voting_snapshots(period).await? {
                self.voting_snapshots.table.load((s.period, s.baker_id), s);
            }
            self.voting_snapshots.mark_loaded(period);
        }
        Ok(self
            .voting_snapshots
            .table
            .range((period, i64::MIN)..=(period, i64::MAX))
            .cloned()
            .collect())
    }

    pub async fn voting_snapshot(
        &mut self,
        store: &dyn IndexStore,
        period: i64,
        baker_id: i64,
    ) -> Result<Option<VotingSnapshot>, IndexerError> {
        self.voting_snapshots(store, period).await?;
        Ok(match self.voting_snapshots.table.lookup(&(period, baker_id)) {
            Lookup::Hit(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn put_voting_snapshot(&mut self, snapshot: VotingSnapshot) {
        self.voting_snapshots
            .table
            .put((snapshot.period, snapshot.baker_id), snapshot);
    }

    pub fn remove_voting_snapshot(&mut self, period: i64, baker_id: i64) {
        self.voting_snapshots.table.remove(&(period, baker_id));
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    /// Operations applied at `level`, by ascending id.
    pub async fn operations_at(&mut self, store: &dyn IndexStore, level: i64) -> Result<Vec<Operation>, IndexerError> {
        if !self.operations.is_loaded(level) {
            for op in store.operations_at(level).await? {
                self.operations.table.load(op.id, op);
            }
            self.operations.mark_loaded(level);
        }
        Ok(self
            .operations
            .table
            .values()
            .filter(|op| op.level == level)
            .cloned()
            .collect())
    }

    /// Declare that the store holds no operations at `level` yet.
    pub fn mark_operations_loaded(&mut self, level: i64) {
        self.operations.mark_loaded(level);
    }

    pub fn put_operation(&mut self, op: Operation) {
        self.operations.table.put(op.id, op);
    }

    pub fn remove_operation(&mut self, id: i64) {
        self.operations.table.remove(&id);
    }

    // ─── Statistics ──────────────────────────────────────────────────────────

    pub async fn statistics(&mut self, store: &dyn IndexStore, level: i64) -> Result<Option<Statistics>, IndexerError> {
        match self.statistics.lookup(&level) {
            Lookup::Hit(s) => return Ok(Some(s.clone())),
            Lookup::Removed => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = store.statistics(level).await?;
        if let Some(s) = &loaded {
            self.statistics.load(level, s.clone());
        }
        Ok(loaded)
    }

    pub fn put_statistics(&mut self, stats: Statistics) {
        self.statistics.put(stats.level, stats);
    }

    pub fn remove_statistics(&mut self, level: i64) {
        self.statistics.remove(&level);
    }

    // ─── Flush ───────────────────────────────────────────────────────────────

    pub fn has_changes(&self) -> bool {
        self.blocks.has_changes()
            || self.accounts.has_changes()
            || self.protocols.has_changes()
            || self.cycles.has_changes()
            || self.snapshots.table.has_changes()
            || self.baker_cycles.table.has_changes()
            || !self.cleared_right_cycles.is_empty()
            || self.rights.table.has_changes()
            || self.periods.has_changes()
            || self.voting_snapshots.table.has_changes()
            || self.operations.table.has_changes()
            || self.statistics.has_changes()
    }

    /// Drain every pending change into one batch. The cache then mirrors
    /// what the store will hold once the batch is committed.
    pub fn take_changes(&mut self, state: &AppState) -> WriteBatch {
        WriteBatch {
            app_state: Some(state.clone()),
            blocks: self.blocks.take_changes(),
            accounts: self.accounts.take_changes(),
            protocols: self.protocols.take_changes(),
            cycles: self.cycles.take_changes(),
            snapshot_balances: self.snapshots.table.take_changes(),
            baker_cycles: self.baker_cycles.table.take_changes(),
            cleared_right_cycles: std::mem::take(&mut self.cleared_right_cycles),
            rights: self.rights.table.take_changes(),
            voting_periods: self.periods.take_changes(),
            voting_snapshots: self.voting_snapshots.table.take_changes(),
            operations: self.operations.table.take_changes(),
            statistics: self.statistics.take_changes(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
            + self.accounts.len()
            + self.protocols.len()
            + self.cycles.len()
            + self.snapshots.table.len()
            + self.baker_cycles.table.len()
            + self.rights.table.len()
            + self.periods.len()
            + self.voting_snapshots.table.len()
            + self.operations.table.len()
            + self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the cache once it grows past `capacity` rows. Only call this
    /// right after a successful flush.
    pub fn trim(&mut self, capacity: usize) {
        if self.len() > capacity {
            tracing::debug!(rows = self.len(), capacity, "Trimming entity cache");
            self.reset();
        }
    }

    /// Forget everything, including uncommitted changes.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.accounts.clear();
        self.addresses.clear();
        self.bakers_loaded = false;
        self.protocols.clear();
        self.cycles.clear();
        self.snapshots.clear();
        self.baker_cycles.clear();
        self.rights.clear();
        self.cleared_right_cycles.clear();
        self.periods.clear();
        self.voting_snapshots.clear();
        self.operations.clear();
        self.statistics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_put_then_remove_yields_delete() {
        let mut t: Table<i64, &str> = Table::default();
        t.put(1, "a");
        t.remove(&1);
        assert_eq!(t.lookup(&1), Lookup::Removed);
        assert_eq!(t.take_changes(), vec![Change::Delete(1)]);
        assert_eq!(t.lookup(&1), Lookup::Miss);
    }

    #[test]
    fn table_remove_then_put_yields_upsert() {
        let mut t: Table<i64, &str> = Table::default();
        t.load(1, "old");
        t.remove(&1);
        t.put(1, "new");
        assert_eq!(t.lookup(&1), Lookup::Hit(&"new"));
        assert_eq!(t.take_changes(), vec![Change::Upsert("new")]);
        assert!(!t.has_changes());
    }

    #[test]
    fn load_does_not_override_working_copy() {
        let mut t: Table<i64, &str> = Table::default();
        t.put(2, "working");
        t.load(2, "stale");
        assert_eq!(t.lookup(&2), Lookup::Hit(&"working"));
        t.remove(&3);
        t.load(3, "deleted");
        assert_eq!(t.lookup(&3), Lookup::Removed);
    }

    #[test]
    fn clean_rows_produce_no_changes() {
        let mut t: Table<i64, i64> = Table::default();
        t.load(1, 10);
        t.load(2, 20);
        assert!(t.take_changes().is_empty());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn forget_where_drops_rows_silently() {
        let mut t: Table<i64, i64> = Table::default();
        t.put(1, 10);
        t.put(2, 20);
        t.forget_where(|k, _| *k == 1);
        assert_eq!(t.take_changes(), vec![Change::Upsert(20)]);
        assert_eq!(t.lookup(&1), Lookup::Miss);
    }

    #[test]
    fn take_changes_carries_state_and_cleared_cycles() {
        let mut cache = EntityCache::new();
        cache.clear_cycle_rights(4, 33..=40);
        cache.put_cycle(Cycle {
            index: 4,
            first_level: 33,
            last_level: 40,
            snapshot_level: 16,
            seed: "00".into(),
            total_baking_power: 0,
            total_bakers: 0,
            total_staked: 0,
            total_delegated: 0,
            generated_level: 17,
        });
        assert!(cache.has_changes());
        let batch = cache.take_changes(&AppState::initial());
        assert_eq!(batch.cleared_right_cycles, vec![4]);
        assert_eq!(batch.cycles.len(), 1);
        assert!(batch.app_state.is_some());
        assert!(!cache.has_changes());
    }

    #[test]
    fn trim_only_past_capacity() {
        let mut cache = EntityCache::new();
        cache.put_statistics(Statistics::next(None, 1));
        cache.take_changes(&AppState::initial());
        cache.trim(10);
        assert_eq!(cache.len(), 1);
        cache.trim(0);
        assert!(cache.is_empty());
    }
}
