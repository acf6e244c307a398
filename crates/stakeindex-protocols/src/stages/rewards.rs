//! Pays baking and attestation rewards and books missed ones.
//!
//! Runs after the rights of the level are resolved. Revert replays the same
//! computation with the opposite sign: every input (block row, baker-cycle
//! snapshot, right statuses, constants) is unchanged at that point.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{BakerCycle, RightKind, RightStatus};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};
use crate::rewards::{block_reward, split_reward, RewardSplit};
use crate::stages::baking_rights::attestation_rights;

pub struct RewardsStage;

#[async_trait]
impl CommitStage for RewardsStage {
    fn name(&self) -> &'static str {
        "rewards"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        settle(ctx, 1).await?;
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        settle(ctx, -1).await
    }
}

async fn settle(ctx: &mut LevelContext<'_>, sign: i64) -> Result<(), IndexerError> {
    let constants = ctx.constants()?.clone();
    let rules = ctx.rules();
    let cycle = ctx.cycle()?;
    let level = ctx.level;

    // Block reward to the proposer.
    if let Some(proposer) = ctx.block()?.proposer_id {
        let attested = ctx.block()?.attested_slots;
        let reward = block_reward(
            constants.baking_reward_fixed,
            constants.baking_reward_bonus_per_slot,
            attested,
            constants.consensus_threshold,
        );
        let snapshot = ctx.baker_cycle(cycle, proposer).await?.unwrap_or_default();
        let split = split_reward(reward, &snapshot, constants.edge_of_staking_billionth, &rules).signed(sign);
        credit(ctx, proposer, &split).await?;
        ctx.update_block(|b| split.add_block_reward(b))?;
        ctx.update_baker_cycle_if_present(cycle, proposer, |bc| split.add_to_block_rewards(bc))
            .await?;
    }

    // Missed baking rights of this level.
    let missed: Vec<_> = ctx
        .cache
        .rights_at(ctx.store, level)
        .await?
        .into_iter()
        .filter(|r| r.kind == RightKind::Baking && r.status == RightStatus::Missed)
        .collect();
    for right in missed {
        let amount = constants.baking_reward_fixed * sign;
        ctx.update_baker_cycle(right.cycle, right.baker_id, |bc| bc.missed_block_rewards += amount)
            .await?;
    }

    // Attestations of the previous level.
    for right in attestation_rights(ctx, level - 1).await? {
        let reward = right.slots.unwrap_or(0) as i64 * constants.attesting_reward_per_slot;
        match right.status {
            RightStatus::Realized => {
                let snapshot: BakerCycle = ctx
                    .baker_cycle(right.cycle, right.baker_id)
                    .await?
                    .ok_or_else(|| IndexerError::missing("baker cycle", format!("{}/{}", right.cycle, right.baker_id)))?;
                let split =
                    split_reward(reward, &snapshot, constants.edge_of_staking_billionth, &rules).signed(sign);
                credit(ctx, right.baker_id, &split).await?;
                ctx.update_baker_cycle(right.cycle, right.baker_id, |bc| split.add_to_attestation_rewards(bc))
                    .await?;
            }
            RightStatus::Missed => {
                ctx.update_baker_cycle(right.cycle, right.baker_id, |bc| {
                    bc.missed_attestation_rewards += reward * sign
                })
                .await?;
            }
            RightStatus::Future => {}
        }
    }
    Ok(())
}

async fn credit(ctx: &mut LevelContext<'_>, baker_id: i64, split: &RewardSplit) -> Result<(), IndexerError> {
    let mut baker = ctx.account(baker_id).await?;
    split.credit(&mut baker);
    ctx.put_account(baker);
    let created = split.total();
    ctx.update_statistics(|s| s.total_created += created).await
}
