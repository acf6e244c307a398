//! SQLite storage backend.
//!
//! Each table has the columns needed for lookups plus a JSON `data` column
//! with the full row. A level's [`WriteBatch`] is applied in one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use stakeindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{
    Account, AppState, BakerCycle, BakingRight, Block, Cycle, Operation, Protocol, RightKind, SnapshotBalance,
    Statistics, SupplyTotals, SyncStatus, VotingPeriod, VotingSnapshot,
};
use stakeindex_core::store::{Change, IndexStore, WriteBatch};

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn to_json<T: Serialize>(v: &T) -> Result<String, IndexerError> {
    serde_json::to_string(v).map_err(|e| IndexerError::Storage(e.to_string()))
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, IndexerError> {
    serde_json::from_str(s).map_err(|e| IndexerError::Storage(format!("corrupt row: {e}")))
}

fn kind_str(kind: RightKind) -> &'static str {
    match kind {
        RightKind::Baking => "baking",
        RightKind::Attestation => "attestation",
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS app_state (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        data       TEXT,
        known_head INTEGER NOT NULL DEFAULT 0,
        known_hash TEXT    NOT NULL DEFAULT '',
        last_sync  TEXT
    );",
    "CREATE TABLE IF NOT EXISTS blocks (
        level INTEGER PRIMARY KEY,
        hash  TEXT NOT NULL,
        data  TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS accounts (
        id              INTEGER PRIMARY KEY,
        address         TEXT    NOT NULL UNIQUE,
        kind            TEXT    NOT NULL,
        balance         INTEGER NOT NULL,
        external_staked INTEGER NOT NULL,
        data            TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS protocols (
        hash TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS cycles (
        idx  INTEGER PRIMARY KEY,
        data TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS snapshot_balances (
        cycle    INTEGER NOT NULL,
        baker_id INTEGER NOT NULL,
        data     TEXT    NOT NULL,
        PRIMARY KEY (cycle, baker_id)
    );",
    "CREATE TABLE IF NOT EXISTS baker_cycles (
        cycle    INTEGER NOT NULL,
        baker_id INTEGER NOT NULL,
        data     TEXT    NOT NULL,
        PRIMARY KEY (cycle, baker_id)
    );",
    "CREATE TABLE IF NOT EXISTS rights (
        level INTEGER NOT NULL,
        kind  TEXT    NOT NULL,
        slot  INTEGER NOT NULL,
        cycle INTEGER NOT NULL,
        data  TEXT    NOT NULL,
        PRIMARY KEY (level, kind, slot)
    );",
    "CREATE INDEX IF NOT EXISTS idx_rights_cycle ON rights (cycle);",
    "CREATE TABLE IF NOT EXISTS voting_periods (
        idx  INTEGER PRIMARY KEY,
        data TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS voting_snapshots (
        period   INTEGER NOT NULL,
        baker_id INTEGER NOT NULL,
        data     TEXT    NOT NULL,
        PRIMARY KEY (period, baker_id)
    );",
    "CREATE TABLE IF NOT EXISTS operations (
        id    INTEGER PRIMARY KEY,
        level INTEGER NOT NULL,
        data  TEXT    NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_operations_level ON operations (level);",
    "CREATE TABLE IF NOT EXISTS statistics (
        level INTEGER PRIMARY KEY,
        data  TEXT NOT NULL
    );",
];

/// SQLite-backed index store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn fetch_one_json<T: DeserializeOwned>(&self, sql: &str, key: i64) -> Result<Option<T>, IndexerError> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(from_json(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn fetch_all_json<T: DeserializeOwned>(&self, sql: &str, key: i64) -> Result<Vec<T>, IndexerError> {
        let rows = sqlx::query(sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|row| from_json(&row.get::<String, _>("data"))).collect()
    }
}

// ─── Batch writers ────────────────────────────────────────────────────────────

type Tx<'a> = Transaction<'a, Sqlite>;
type Query<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

async fn exec(tx: &mut Tx<'_>, q: Query<'_>) -> Result<(), IndexerError> {
    q.execute(&mut **tx).await.map_err(db_err)?;
    Ok(())
}

/// Rows keyed by a single integer column, with nothing else to index.
async fn write_int_keyed<V: Serialize>(
    tx: &mut Tx<'_>,
    table: &str,
    key_col: &str,
    changes: &[Change<i64, V>],
    key: impl Fn(&V) -> i64,
) -> Result<(), IndexerError> {
    let upsert = format!("INSERT OR REPLACE INTO {table} ({key_col}, data) VALUES (?, ?)");
    let delete = format!("DELETE FROM {table} WHERE {key_col} = ?");
    for change in changes {
        match change {
            Change::Upsert(v) => exec(tx, sqlx::query(&upsert).bind(key(v)).bind(to_json(v)?)).await?,
            Change::Delete(k) => exec(tx, sqlx::query(&delete).bind(*k)).await?,
        }
    }
    Ok(())
}

/// Rows keyed by `(group, baker_id)`.
async fn write_pair_keyed<V: Serialize>(
    tx: &mut Tx<'_>,
    table: &str,
    group_col: &str,
    changes: &[Change<(i64, i64), V>],
    key: impl Fn(&V) -> (i64, i64),
) -> Result<(), IndexerError> {
    let upsert = format!("INSERT OR REPLACE INTO {table} ({group_col}, baker_id, data) VALUES (?, ?, ?)");
    let delete = format!("DELETE FROM {table} WHERE {group_col} = ? AND baker_id = ?");
    for change in changes {
        match change {
            Change::Upsert(v) => {
                let (g, b) = key(v);
                exec(tx, sqlx::query(&upsert).bind(g).bind(b).bind(to_json(v)?)).await?
            }
            Change::Delete((g, b)) => exec(tx, sqlx::query(&delete).bind(*g).bind(*b)).await?,
        }
    }
    Ok(())
}

async fn write_batch(tx: &mut Tx<'_>, batch: &WriteBatch) -> Result<(), IndexerError> {
    if let Some(state) = &batch.app_state {
        exec(
            tx,
            sqlx::query(
                "INSERT INTO app_state (id, data) VALUES (1, ?)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            )
            .bind(to_json(state)?),
        )
        .await?;
    }

    for change in &batch.blocks {
        match change {
            Change::Upsert(b) => {
                exec(
                    tx,
                    sqlx::query("INSERT OR REPLACE INTO blocks (level, hash, data) VALUES (?, ?, ?)")
                        .bind(b.level)
                        .bind(&b.hash)
                        .bind(to_json(b)?),
                )
                .await?
            }
            Change::Delete(level) => exec(tx, sqlx::query("DELETE FROM blocks WHERE level = ?").bind(*level)).await?,
        }
    }

    for change in &batch.accounts {
        match change {
            Change::Upsert(a) => {
                exec(
                    tx,
                    sqlx::query(
                        "INSERT OR REPLACE INTO accounts (id, address, kind, balance, external_staked, data)
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(a.id)
                    .bind(&a.address)
                    .bind(if a.is_baker() { "baker" } else { "user" })
                    .bind(a.balance)
                    .bind(a.external_staked_balance)
                    .bind(to_json(a)?),
                )
                .await?
            }
            Change::Delete(id) => exec(tx, sqlx::query("DELETE FROM accounts WHERE id = ?").bind(*id)).await?,
        }
    }

    for change in &batch.protocols {
        match change {
            Change::Upsert(p) => {
                exec(
                    tx,
                    sqlx::query("INSERT OR REPLACE INTO protocols (hash, data) VALUES (?, ?)")
                        .bind(&p.hash)
                        .bind(to_json(p)?),
                )
                .await?
            }
            Change::Delete(hash) => exec(tx, sqlx::query("DELETE FROM protocols WHERE hash = ?").bind(hash)).await?,
        }
    }

    write_int_keyed(tx, "cycles", "idx", &batch.cycles, |c| c.index).await?;
    write_pair_keyed(tx, "snapshot_balances", "cycle", &batch.snapshot_balances, |s| {
        (s.cycle, s.baker_id)
    })
    .await?;
    write_pair_keyed(tx, "baker_cycles", "cycle", &batch.baker_cycles, |bc| {
        (bc.cycle, bc.baker_id)
    })
    .await?;

    for cycle in &batch.cleared_right_cycles {
        exec(tx, sqlx::query("DELETE FROM rights WHERE cycle = ?").bind(*cycle)).await?;
    }
    for change in &batch.rights {
        match change {
            Change::Upsert(r) => {
                let key = r.key();
                exec(
                    tx,
                    sqlx::query("INSERT OR REPLACE INTO rights (level, kind, slot, cycle, data) VALUES (?, ?, ?, ?, ?)")
                        .bind(key.level)
                        .bind(kind_str(key.kind))
                        .bind(key.slot)
                        .bind(r.cycle)
                        .bind(to_json(r)?),
                )
                .await?
            }
            Change::Delete(key) => {
                exec(
                    tx,
                    sqlx::query("DELETE FROM rights WHERE level = ? AND kind = ? AND slot = ?")
                        .bind(key.level)
                        .bind(kind_str(key.kind))
                        .bind(key.slot),
                )
                .await?
            }
        }
    }

    write_int_keyed(tx, "voting_periods", "idx", &batch.voting_periods, |p| p.index).await?;
    write_pair_keyed(tx, "voting_snapshots", "period", &batch.voting_snapshots, |s| {
        (s.period, s.baker_id)
    })
    .await?;

    for change in &batch.operations {
        match change {
            Change::Upsert(op) => {
                exec(
                    tx,
                    sqlx::query("INSERT OR REPLACE INTO operations (id, level, data) VALUES (?, ?, ?)")
                        .bind(op.id)
                        .bind(op.level)
                        .bind(to_json(op)?),
                )
                .await?
            }
            Change::Delete(id) => exec(tx, sqlx::query("DELETE FROM operations WHERE id = ?").bind(*id)).await?,
        }
    }

    write_int_keyed(tx, "statistics", "level", &batch.statistics, |s| s.level).await?;
    Ok(())
}

// ─── IndexStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn app_state(&self) -> Result<Option<AppState>, IndexerError> {
        let row = sqlx::query("SELECT data FROM app_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row.and_then(|r| r.get::<Option<String>, _>("data")) {
            Some(data) => Ok(Some(from_json(&data)?)),
            None => Ok(None),
        }
    }

    async fn sync_status(&self) -> Result<SyncStatus, IndexerError> {
        let row = sqlx::query("SELECT known_head, known_hash, last_sync FROM app_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(match row {
            Some(row) => SyncStatus {
                known_head: row.get("known_head"),
                known_hash: row.get("known_hash"),
                last_sync: row.get::<Option<DateTime<Utc>>, _>("last_sync"),
            },
            None => SyncStatus::default(),
        })
    }

    async fn save_sync_status(&self, status: &SyncStatus) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO app_state (id, known_head, known_hash, last_sync) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                known_head = excluded.known_head,
                known_hash = excluded.known_hash,
                last_sync  = excluded.last_sync",
        )
        .bind(status.known_head)
        .bind(&status.known_hash)
        .bind(status.last_sync)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn block(&self, level: i64) -> Result<Option<Block>, IndexerError> {
        self.fetch_one_json("SELECT data FROM blocks WHERE level = ?", level).await
    }

    async fn account(&self, id: i64) -> Result<Option<Account>, IndexerError> {
        self.fetch_one_json("SELECT data FROM accounts WHERE id = ?", id).await
    }

    async fn account_by_address(&self, address: &str) -> Result<Option<Account>, IndexerError> {
        let row = sqlx::query("SELECT data FROM accounts WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(from_json(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn baker_ids(&self) -> Result<Vec<i64>, IndexerError> {
        let rows = sqlx::query("SELECT id FROM accounts WHERE kind = 'baker' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    async fn protocol(&self, hash: &str) -> Result<Option<Protocol>, IndexerError> {
        let row = sqlx::query("SELECT data FROM protocols WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(from_json(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn cycle(&self, index: i64) -> Result<Option<Cycle>, IndexerError> {
        self.fetch_one_json("SELECT data FROM cycles WHERE idx = ?", index).await
    }

    async fn snapshot_balances(&self, cycle: i64) -> Result<Vec<SnapshotBalance>, IndexerError> {
        self.fetch_all_json(
            "SELECT data FROM snapshot_balances WHERE cycle = ? ORDER BY baker_id",
            cycle,
        )
        .await
    }

    async fn baker_cycles(&self, cycle: i64) -> Result<Vec<BakerCycle>, IndexerError> {
        self.fetch_all_json("SELECT data FROM baker_cycles WHERE cycle = ? ORDER BY baker_id", cycle)
            .await
    }

    async fn rights_at(&self, level: i64) -> Result<Vec<BakingRight>, IndexerError> {
        self.fetch_all_json("SELECT data FROM rights WHERE level = ? ORDER BY kind, slot", level)
            .await
    }

    async fn rights_in_cycle(&self, cycle: i64) -> Result<Vec<BakingRight>, IndexerError> {
        self.fetch_all_json(
            "SELECT data FROM rights WHERE cycle = ? ORDER BY level, kind, slot",
            cycle,
        )
        .await
    }

    async fn voting_period(&self, index: i64) -> Result<Option<VotingPeriod>, IndexerError> {
        self.fetch_one_json("SELECT data FROM voting_periods WHERE idx = ?", index)
            .await
    }

    async fn voting_snapshots(&self, period: i64) -> Result<Vec<VotingSnapshot>, IndexerError> {
        self.fetch_all_json(
            "SELECT data FROM voting_snapshots WHERE period = ? ORDER BY baker_id",
            period,
        )
        .await
    }

    async fn operations_at(&self, level: i64) -> Result<Vec<Operation>, IndexerError> {
        self.fetch_all_json("SELECT data FROM operations WHERE level = ? ORDER BY id", level)
            .await
    }

    async fn statistics(&self, level: i64) -> Result<Option<Statistics>, IndexerError> {
        self.fetch_one_json("SELECT data FROM statistics WHERE level = ?", level)
            .await
    }

    async fn supply_totals(&self) -> Result<SupplyTotals, IndexerError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(balance), 0) AS balances,
                    COALESCE(SUM(external_staked), 0) AS external_staked
             FROM accounts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(SupplyTotals {
            balances: row.get("balances"),
            external_staked: row.get("external_staked"),
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let Err(e) = write_batch(&mut tx, &batch).await {
            tx.rollback().await.map_err(db_err)?;
            return Err(e);
        }
        tx.commit().await.map_err(db_err)?;
        debug!(rows = batch.len(), "batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::model::{AccountKind, RightStatus};

    #[tokio::test]
    async fn empty_store_has_no_state() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.app_state().await.unwrap().is_none());
        assert_eq!(store.sync_status().await.unwrap(), SyncStatus::default());
        assert_eq!(store.supply_totals().await.unwrap(), SupplyTotals::default());
    }

    #[tokio::test]
    async fn sync_status_does_not_create_state() {
        let store = SqliteStore::in_memory().await.unwrap();
        let status = SyncStatus {
            known_head: 12,
            known_hash: "B12".into(),
            last_sync: DateTime::from_timestamp(1_700_000_000, 0),
        };
        store.save_sync_status(&status).await.unwrap();
        assert!(store.app_state().await.unwrap().is_none());
        assert_eq!(store.sync_status().await.unwrap(), status);

        let batch = WriteBatch {
            app_state: Some(AppState::initial()),
            ..Default::default()
        };
        store.commit(batch).await.unwrap();
        assert_eq!(store.sync_status().await.unwrap(), status);
        assert_eq!(store.app_state().await.unwrap(), Some(AppState::initial()));
    }

    #[tokio::test]
    async fn batch_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let baker = Account {
            kind: AccountKind::Baker,
            balance: 500,
            external_staked_balance: 20,
            ..Account::new_user(1, "tz1b", 1)
        };
        let mut batch = WriteBatch::default();
        batch.accounts.push(Change::Upsert(baker.clone()));
        batch.accounts.push(Change::Upsert(Account {
            balance: 30,
            ..Account::new_user(2, "tz1u", 2)
        }));
        batch.rights.push(Change::Upsert(BakingRight::baking(0, 2, 0, 1, RightStatus::Future)));
        batch.rights.push(Change::Upsert(BakingRight::attestation(0, 2, 1, 16)));
        store.commit(batch).await.unwrap();

        assert_eq!(store.account(1).await.unwrap(), Some(baker));
        assert_eq!(store.account_by_address("tz1u").await.unwrap().unwrap().id, 2);
        assert_eq!(store.baker_ids().await.unwrap(), vec![1]);
        assert_eq!(store.rights_at(2).await.unwrap().len(), 2);
        assert_eq!(
            store.supply_totals().await.unwrap(),
            SupplyTotals {
                balances: 530,
                external_staked: 20
            }
        );

        let mut batch = WriteBatch::default();
        batch.cleared_right_cycles.push(0);
        batch.accounts.push(Change::Delete(2));
        store.commit(batch).await.unwrap();
        assert!(store.rights_in_cycle(0).await.unwrap().is_empty());
        assert!(store.account(2).await.unwrap().is_none());
    }
}
