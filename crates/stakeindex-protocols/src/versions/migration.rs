//! Activation of a staking protocol on top of a running chain.
//!
//! The new protocol keeps the cycle numbering of its predecessor. A change
//! of `blocks_per_cycle` is only accepted on a cycle boundary: the cycles
//! already generated are moved onto the new layout and their rights
//! regenerated. A longer `rights_delay` generates the missing cycles right
//! away from the current stake.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Protocol, ProtocolConstants};

use crate::context::LevelContext;
use crate::handler::Migration;
use crate::stages::cycle::{generate_cycle, relayout_cycles, remove_cycle_generated_at};

pub struct ProtocolMigration;

async fn previous(ctx: &mut LevelContext<'_>) -> Result<Protocol, IndexerError> {
    let hash = ctx.state.protocol.clone();
    ctx.cache
        .protocol(ctx.store, &hash)
        .await?
        .ok_or_else(|| IndexerError::missing("protocol", hash))
}

#[async_trait]
impl Migration for ProtocolMigration {
    async fn activate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        let level = ctx.level;
        let mut prev = previous(ctx).await?;
        let constants = ProtocolConstants::derive(&ctx.node_constants().await?);

        let cycle = prev.cycle_of(level);
        let mut protocol = Protocol {
            hash: raw.protocol.clone(),
            code: prev.code + 1,
            first_level: level,
            last_level: None,
            first_cycle: cycle,
            first_cycle_level: prev.cycle_first_level(cycle),
            constants,
        };
        let relayout = protocol.constants.blocks_per_cycle != prev.constants.blocks_per_cycle;
        if relayout {
            if !prev.is_cycle_start(level) {
                return Err(IndexerError::UnsupportedMigration(format!(
                    "blocks_per_cycle changes from {} to {} inside cycle {cycle} (level {level})",
                    prev.constants.blocks_per_cycle, protocol.constants.blocks_per_cycle
                )));
            }
            protocol.first_cycle_level = level;
        }

        prev.last_level = Some(level - 1);
        ctx.cache.put_protocol(prev.clone());
        ctx.cache.put_protocol(protocol.clone());
        ctx.protocol = Some(protocol.clone());

        if relayout {
            relayout_cycles(ctx, cycle, &protocol).await?;
        }
        let mut generated = 0;
        for index in cycle + 1..=cycle + protocol.constants.rights_delay {
            if ctx.cache.cycle(ctx.store, index).await?.is_none() {
                generate_cycle(ctx, index, level - 1, i64::MIN).await?;
                generated += 1;
            }
        }

        tracing::info!(
            level,
            protocol = %protocol.hash,
            code = protocol.code,
            first_cycle = cycle,
            relayout,
            generated,
            "Protocol migrated"
        );
        Ok(())
    }

    async fn deactivate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let protocol = ctx.protocol()?.clone();
        let level = ctx.level;
        let mut prev = previous(ctx).await?;

        let cycle = protocol.first_cycle;
        for index in (cycle + 1..=cycle + protocol.constants.rights_delay).rev() {
            remove_cycle_generated_at(ctx, index, level).await?;
        }
        if protocol.constants.blocks_per_cycle != prev.constants.blocks_per_cycle {
            relayout_cycles(ctx, cycle, &prev).await?;
        }

        ctx.cache.remove_protocol(&protocol.hash);
        prev.last_level = None;
        ctx.cache.put_protocol(prev.clone());
        ctx.protocol = Some(prev);
        Ok(())
    }
}
