//! Opens the level's supply ledger row.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::Statistics;

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

/// Carries the previous level's totals forward; later stages add to them.
pub struct StatisticsStage;

#[async_trait]
impl CommitStage for StatisticsStage {
    fn name(&self) -> &'static str {
        "statistics"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let prev = if ctx.level > 0 {
            ctx.cache.statistics(ctx.store, ctx.level - 1).await?
        } else {
            None
        };
        ctx.cache.put_statistics(Statistics::next(prev.as_ref(), ctx.level));
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        ctx.cache.remove_statistics(ctx.level);
        Ok(())
    }
}
