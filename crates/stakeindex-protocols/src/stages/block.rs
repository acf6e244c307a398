//! Builds the block row and its event flags.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Block, BlockEvents, OperationKinds};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

pub struct BlockStage;

#[async_trait]
impl CommitStage for BlockStage {
    fn name(&self) -> &'static str {
        "block"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let raw = ctx.raw()?;
        let protocol = ctx.protocol()?.clone();
        let level = ctx.level;

        let proposer_id = if raw.proposer.is_empty() {
            None
        } else {
            Some(ctx.baker_at(&raw.proposer).await?.id)
        };

        let mut events = BlockEvents::NONE;
        if protocol.is_cycle_start(level) {
            events.insert(BlockEvents::CYCLE_BEGIN);
        }
        if protocol.is_cycle_end(level) {
            events.insert(BlockEvents::CYCLE_END);
        }
        if ctx.activating {
            events.insert(BlockEvents::PROTOCOL_BEGIN);
        }
        if raw.protocol != raw.next_protocol {
            events.insert(BlockEvents::PROTOCOL_END);
        }
        if ctx.new_accounts > 0 {
            events.insert(BlockEvents::NEW_ACCOUNTS);
        }
        if ctx.state.voting_period >= 0 {
            if let Some(period) = ctx.cache.voting_period(ctx.store, ctx.state.voting_period).await? {
                if period.first_level == level {
                    events.insert(BlockEvents::VOTING_PERIOD_BEGIN);
                }
                if period.last_level == level {
                    events.insert(BlockEvents::VOTING_PERIOD_END);
                }
            }
        }

        let block = Block {
            level,
            hash: raw.hash.clone(),
            timestamp: raw.timestamp,
            protocol: raw.protocol.clone(),
            protocol_code: protocol.code,
            cycle: protocol.cycle_of(level),
            payload_round: raw.payload_round,
            proposer_id,
            attested_slots: 0,
            reward_delegated: 0,
            reward_staked_own: 0,
            reward_staked_edge: 0,
            reward_staked_shared: 0,
            fees: 0,
            rounding: 0,
            events,
            operations: OperationKinds::NONE,
        };
        ctx.cache.put_block(block.clone());
        ctx.block = Some(block);
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        ctx.cache.remove_block(ctx.level);
        Ok(())
    }
}
