//! Runs the handler's migration on the first block of a protocol.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

pub struct ActivationStage;

#[async_trait]
impl CommitStage for ActivationStage {
    fn name(&self) -> &'static str {
        "activation"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        if !ctx.activating {
            return Ok(StageOutcome::Skipped);
        }
        let handler = ctx.handler.clone();
        tracing::info!(
            level = ctx.level,
            protocol = %ctx.raw()?.protocol,
            version = %handler.version,
            "Activating protocol"
        );
        handler.activate(ctx).await?;
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        if !ctx.activating {
            return Ok(());
        }
        let handler = ctx.handler.clone();
        tracing::info!(level = ctx.level, version = %handler.version, "Deactivating protocol");
        handler.deactivate(ctx).await
    }
}
