//! Protocol handlers: an ordered list of commit stages, a table of
//! operation handlers and the migration run when the protocol activates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use stakeindex_core::config::ProtocolVersion;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Operation, OperationKind};
use stakeindex_core::raw::RawOperation;

use crate::context::LevelContext;
use crate::rounding::RoundingTable;

/// Result of one stage's apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    /// Nothing to do at this level.
    Skipped,
    /// The block contains an operation kind this protocol has no handler for.
    UnsupportedKind(String),
}

/// One step of the commit pipeline.
///
/// `revert` must restore exactly what `apply` changed; stages are reverted
/// in reverse order.
#[async_trait]
pub trait CommitStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError>;

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError>;
}

/// Applies and reverts one operation kind.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Apply `raw` and return the row to store under `id`.
    async fn apply(&self, ctx: &mut LevelContext<'_>, raw: &RawOperation, id: i64)
        -> Result<Operation, IndexerError>;

    /// Undo `op`. Later operations of the level are already reverted.
    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError>;
}

/// Work done once when a protocol becomes active.
#[async_trait]
pub trait Migration: Send + Sync {
    async fn activate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError>;

    async fn deactivate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError>;
}

// ─── ProtocolHandler ─────────────────────────────────────────────────────────

pub struct ProtocolHandler {
    pub version: ProtocolVersion,
    pub rules: RoundingTable,
    stages: Vec<Arc<dyn CommitStage>>,
    operations: HashMap<OperationKind, Arc<dyn OperationHandler>>,
    migration: Arc<dyn Migration>,
}

impl ProtocolHandler {
    pub fn builder(version: ProtocolVersion, migration: Arc<dyn Migration>) -> ProtocolHandlerBuilder {
        ProtocolHandlerBuilder {
            version,
            rules: RoundingTable::FLOOR,
            stages: Vec::new(),
            operations: HashMap::new(),
            migration,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Handler for an operation kind string, if this protocol supports it.
    pub fn operation(&self, kind: &str) -> Option<Arc<dyn OperationHandler>> {
        OperationKind::parse(kind).and_then(|k| self.operations.get(&k).cloned())
    }

    pub fn supports(&self, kind: OperationKind) -> bool {
        self.operations.contains_key(&kind)
    }

    /// Run every stage in order.
    pub async fn commit(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        for stage in &self.stages {
            match stage.apply(ctx).await? {
                StageOutcome::Applied => {
                    tracing::trace!(level = ctx.level, stage = stage.name(), "Stage applied");
                }
                StageOutcome::Skipped => {}
                StageOutcome::UnsupportedKind(kind) => {
                    return Err(IndexerError::UnsupportedOperation {
                        kind,
                        protocol: ctx.raw()?.protocol.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run every stage's revert in reverse order.
    pub async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        for stage in self.stages.iter().rev() {
            stage.revert(ctx).await?;
            tracing::trace!(level = ctx.level, stage = stage.name(), "Stage reverted");
        }
        Ok(())
    }

    pub async fn activate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        self.migration.activate(ctx).await
    }

    pub async fn deactivate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        self.migration.deactivate(ctx).await
    }
}

impl std::fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.operations.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ProtocolHandler")
            .field("version", &self.version)
            .field("stages", &self.stage_names())
            .field("operations", &kinds)
            .finish()
    }
}

pub struct ProtocolHandlerBuilder {
    version: ProtocolVersion,
    rules: RoundingTable,
    stages: Vec<Arc<dyn CommitStage>>,
    operations: HashMap<OperationKind, Arc<dyn OperationHandler>>,
    migration: Arc<dyn Migration>,
}

impl ProtocolHandlerBuilder {
    pub fn rules(mut self, rules: RoundingTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn stage(mut self, stage: impl CommitStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn operation(mut self, handler: impl OperationHandler + 'static) -> Self {
        self.operations.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn build(self) -> ProtocolHandler {
        ProtocolHandler {
            version: self.version,
            rules: self.rules,
            stages: self.stages,
            operations: self.operations,
            migration: self.migration,
        }
    }
}
