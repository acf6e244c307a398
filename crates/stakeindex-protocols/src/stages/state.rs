//! Moves the checkpoint to this level.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::AppState;

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

pub struct StateStage;

#[async_trait]
impl CommitStage for StateStage {
    fn name(&self) -> &'static str {
        "state"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let raw = ctx.raw()?;
        let cycle = ctx.block()?.cycle;
        let state = &mut ctx.state;
        state.level = raw.level;
        state.hash = raw.hash.clone();
        state.protocol = raw.protocol.clone();
        state.next_protocol = raw.next_protocol.clone();
        state.timestamp = raw.timestamp;
        state.cycle = cycle;
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let reverted = ctx.block()?.protocol.clone();
        if ctx.level == 0 {
            let initial = AppState::initial();
            let state = &mut ctx.state;
            state.level = initial.level;
            state.hash = initial.hash;
            state.protocol = initial.protocol;
            state.next_protocol = initial.next_protocol;
            state.timestamp = initial.timestamp;
            state.cycle = initial.cycle;
            return Ok(());
        }
        let prev = ctx
            .cache
            .block(ctx.store, ctx.level - 1)
            .await?
            .ok_or_else(|| IndexerError::missing("block", ctx.level - 1))?;
        let state = &mut ctx.state;
        state.level = prev.level;
        state.hash = prev.hash;
        state.protocol = prev.protocol;
        state.next_protocol = reverted;
        state.timestamp = prev.timestamp;
        state.cycle = prev.cycle;
        Ok(())
    }
}
