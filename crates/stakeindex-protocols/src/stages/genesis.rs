//! The genesis block: no proposer, no operations, no protocol row.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Block, BlockEvents, OperationKinds};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

pub struct GenesisStage;

#[async_trait]
impl CommitStage for GenesisStage {
    fn name(&self) -> &'static str {
        "genesis"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let raw = ctx.raw()?;
        if raw.level != 0 {
            return Err(IndexerError::Validation {
                level: raw.level,
                reason: format!("genesis protocol {} above level 0", raw.protocol),
                rebase_required: false,
            });
        }
        let mut events = BlockEvents::PROTOCOL_BEGIN;
        if raw.protocol != raw.next_protocol {
            events.insert(BlockEvents::PROTOCOL_END);
        }
        let block = Block {
            level: 0,
            hash: raw.hash.clone(),
            timestamp: raw.timestamp,
            protocol: raw.protocol.clone(),
            protocol_code: -1,
            cycle: 0,
            payload_round: 0,
            proposer_id: None,
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
        ctx.cache.remove_block(0);
        Ok(())
    }
}
