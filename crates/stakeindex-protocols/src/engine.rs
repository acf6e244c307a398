//! The replay engine: commits and reverts one level at a time.
//!
//! Each call builds a [`LevelContext`] over the entity cache, runs the
//! protocol handler's pipeline and flushes every change together with the
//! new checkpoint as a single store transaction. A failure anywhere before
//! the flush discards the cache, so the store and the in-memory state
//! never disagree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use stakeindex_core::cache::{EntityCache, DEFAULT_CAPACITY};
use stakeindex_core::config::ObserverSettings;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Account, AppState, Protocol, ProtocolConstants};
use stakeindex_core::raw::{RawBlock, RawConstants};
use stakeindex_core::reconcile::LocalHead;
use stakeindex_core::store::{Change, IndexStore};
use stakeindex_node::NodeClient;

use crate::context::LevelContext;
use crate::diagnostics;
use crate::registry::ProtocolRegistry;
use crate::validator::{validate_content, validate_structure};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Check proposer and attesters against local rights before commit.
    pub strict_validation: bool,
    /// Run consistency checks after every flush.
    pub diagnostics: bool,
    /// Turn a failed check into a rebase-required error.
    pub diagnostics_fatal: bool,
    /// Entity cache size (rows) above which it is emptied after a flush.
    pub cache_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strict_validation: false,
            diagnostics: false,
            diagnostics_fatal: false,
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &ObserverSettings) -> Self {
        Self {
            strict_validation: settings.strict_validation,
            diagnostics: settings.diagnostics,
            diagnostics_fatal: settings.diagnostics_fatal,
            ..Self::default()
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine {
    store: Arc<dyn IndexStore>,
    node: Arc<dyn NodeClient>,
    registry: Arc<ProtocolRegistry>,
    options: EngineOptions,
    cache: EntityCache,
    state: AppState,
}

impl Engine {
    /// Load the checkpoint from `store` (or start before genesis).
    pub async fn open(
        store: Arc<dyn IndexStore>,
        node: Arc<dyn NodeClient>,
        registry: Arc<ProtocolRegistry>,
        options: EngineOptions,
    ) -> Result<Self, IndexerError> {
        let state = store.app_state().await?.unwrap_or_default();
        tracing::info!(level = state.level, hash = %state.hash, protocol = %state.protocol, "Engine opened");
        Ok(Self {
            store,
            node,
            registry,
            options,
            cache: EntityCache::new(),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn local_head(&self) -> LocalHead {
        LocalHead {
            level: self.state.level,
            hash: self.state.hash.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn node(&self) -> &Arc<dyn NodeClient> {
        &self.node
    }

    /// Drop cached entities and reload the checkpoint.
    pub async fn reset(&mut self) -> Result<(), IndexerError> {
        self.cache.reset();
        self.state = self.store.app_state().await?.unwrap_or_default();
        tracing::info!(level = self.state.level, hash = %self.state.hash, "Engine state reloaded");
        Ok(())
    }

    /// Apply the block on top of the local head.
    pub async fn commit(&mut self, raw: &RawBlock) -> Result<(), IndexerError> {
        let started = Instant::now();
        validate_structure(&self.state, raw)?;
        let handler = self.registry.resolve(&raw.protocol)?;
        let store = self.store.clone();
        let node = self.node.clone();

        let result = async {
            let protocol = self.cache.protocol(store.as_ref(), &raw.protocol).await?;
            let activating = self.state.protocol_switch_pending();
            if self.options.strict_validation && !activating {
                if let Some(p) = &protocol {
                    validate_content(&mut self.cache, store.as_ref(), p, raw).await?;
                }
            }
            let (constants, seeds) = self.prefetch(raw, protocol.as_ref(), activating).await?;

            let mut ctx = LevelContext::for_commit(
                store.as_ref(),
                node.as_ref(),
                &mut self.cache,
                handler.clone(),
                self.state.clone(),
                raw,
            );
            ctx.protocol = protocol;
            ctx.constants = constants;
            ctx.seeds = seeds;
            handler.commit(&mut ctx).await?;
            Ok::<_, IndexerError>(ctx.state)
        }
        .await;

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                self.cache.reset();
                return Err(e);
            }
        };
        let (rows, touched) = self.flush(state).await?;
        tracing::debug!(
            level = raw.level,
            hash = %raw.hash,
            operations = raw.operations.len(),
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Level committed"
        );

        if let Err(e) = self.diagnose(&touched).await {
            tracing::error!(level = raw.level, error = %e, "Diagnostics failed, undoing level");
            self.revert().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Undo the local head.
    pub async fn revert(&mut self) -> Result<(), IndexerError> {
        if self.state.is_initial() {
            return Err(IndexerError::Other("nothing to revert before genesis".into()));
        }
        let started = Instant::now();
        let level = self.state.level;
        let store = self.store.clone();
        let node = self.node.clone();

        let result = async {
            let block = self
                .cache
                .block(store.as_ref(), level)
                .await?
                .ok_or_else(|| IndexerError::missing("block", level))?;
            let handler = self.registry.resolve(&block.protocol)?;
            let protocol = self.cache.protocol(store.as_ref(), &block.protocol).await?;
            let operations = self.cache.operations_at(store.as_ref(), level).await?;

            let mut ctx = LevelContext::for_revert(
                store.as_ref(),
                node.as_ref(),
                &mut self.cache,
                handler.clone(),
                self.state.clone(),
                block,
            );
            ctx.protocol = protocol;
            ctx.operations = operations;
            handler.revert(&mut ctx).await?;
            Ok::<_, IndexerError>(ctx.state)
        }
        .await;

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                self.cache.reset();
                return Err(e);
            }
        };
        let (rows, touched) = self.flush(state).await?;
        tracing::debug!(
            level,
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Level reverted"
        );
        self.diagnose(&touched).await
    }

    /// Fetch what the level needs from the node before anything changes:
    /// constants on activation, seeds of the cycles it will generate.
    async fn prefetch(
        &mut self,
        raw: &RawBlock,
        protocol: Option<&Protocol>,
        activating: bool,
    ) -> Result<(Option<RawConstants>, HashMap<i64, String>), IndexerError> {
        let store = self.store.as_ref();
        let level = raw.level;
        let mut seeds = HashMap::new();

        let (constants, candidates) = if activating {
            let constants = self.node.constants(level).await?;
            let delay = ProtocolConstants::derive(&constants).rights_delay;
            let current = match self.cache.protocol(store, &self.state.protocol).await? {
                Some(prev) => prev.cycle_of(level),
                None => 0,
            };
            (Some(constants), current..=current + delay)
        } else {
            match protocol {
                Some(p) if p.is_cycle_start(level) => {
                    let target = p.cycle_of(level) + p.constants.rights_delay;
                    (None, target..=target)
                }
                _ => return Ok((None, seeds)),
            }
        };
        for cycle in candidates {
            if self.cache.cycle(store, cycle).await?.is_none() {
                seeds.insert(cycle, self.node.cycle_seed(level, cycle).await?);
            }
        }
        Ok((constants, seeds))
    }

    /// Write the cache's changes and the new checkpoint in one transaction.
    /// Returns the number of rows written and the accounts they include.
    async fn flush(&mut self, state: AppState) -> Result<(usize, Vec<Account>), IndexerError> {
        let batch = self.cache.take_changes(&state);
        let rows = batch.len();
        let touched = if self.options.diagnostics {
            batch
                .accounts
                .iter()
                .filter_map(|c| match c {
                    Change::Upsert(a) => Some(a.clone()),
                    Change::Delete(_) => None,
                })
                .collect()
        } else {
            Vec::new()
        };
        if let Err(e) = self.store.commit(batch).await {
            self.cache.reset();
            return Err(e);
        }
        self.state = state;
        self.cache.trim(self.options.cache_capacity);
        Ok((rows, touched))
    }

    async fn diagnose(&self, touched: &[Account]) -> Result<(), IndexerError> {
        if !self.options.diagnostics {
            return Ok(());
        }
        let report =
            diagnostics::check_level(self.store.as_ref(), self.node.as_ref(), self.state.level, touched).await?;
        if report.is_clean() {
            return Ok(());
        }
        for issue in &report.issues {
            tracing::warn!(level = report.level, issue = %issue, "Diagnostics mismatch");
        }
        if self.options.diagnostics_fatal {
            return Err(IndexerError::Diagnostics {
                level: report.level,
                reason: report.issues.join("; "),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("level", &self.state.level)
            .field("hash", &self.state.hash)
            .field("options", &self.options)
            .finish()
    }
}
