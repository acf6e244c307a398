//! Resolves the rights this block realized or missed.
//!
//! * round-0 baking right at this level: realized when the block was
//!   produced at round 0 by its holder, missed otherwise;
//! * rounds `1..=payload_round` are sampled on demand and stored, all
//!   missed except the one that produced the block;
//! * attestation rights of the previous level: realized when the block
//!   includes an attestation from the holder, missed otherwise.
//!
//! Baker-cycle counters move with each status change.

use std::collections::HashSet;

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{BakingRight, OperationBody, RightKey, RightKind, RightStatus};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};
use crate::rights::RightsSampler;

pub struct BakingRightsStage;

#[async_trait]
impl CommitStage for BakingRightsStage {
    fn name(&self) -> &'static str {
        "baking_rights"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let level = ctx.level;
        let round = ctx.block()?.payload_round;
        let proposer = ctx.block()?.proposer_id;

        if let Some(mut right) = ctx.cache.right(ctx.store, baking_key(level, 0)).await? {
            let status = if round == 0 && Some(right.baker_id) == proposer {
                RightStatus::Realized
            } else {
                RightStatus::Missed
            };
            resolve_baking(ctx, &right, status, 1, true).await?;
            right.status = status;
            ctx.cache.put_right(right);
        }

        if round > 0 {
            let cycle = ctx.cycle()?;
            if let Some(cycle_row) = ctx.cache.cycle(ctx.store, cycle).await? {
                let snapshots = ctx.cache.snapshot_balances(ctx.store, cycle).await?;
                let sampler = RightsSampler::new(&cycle_row, &snapshots)?;
                for r in 1..=round {
                    let Some(baker) = sampler.baker(level, r) else {
                        break;
                    };
                    let status = if r == round && Some(baker) == proposer {
                        RightStatus::Realized
                    } else {
                        RightStatus::Missed
                    };
                    let right = BakingRight::baking(cycle, level, r, baker, status);
                    resolve_baking(ctx, &right, status, 1, false).await?;
                    ctx.cache.put_right(right);
                }
            }
        }

        let attesters: HashSet<i64> = ctx
            .operations
            .iter()
            .filter_map(|op| match &op.body {
                OperationBody::Attestation { baker_id, .. } => Some(*baker_id),
                _ => None,
            })
            .collect();
        for mut right in attestation_rights(ctx, level - 1).await? {
            if right.status != RightStatus::Future {
                continue;
            }
            let status = if attesters.contains(&right.baker_id) {
                RightStatus::Realized
            } else {
                RightStatus::Missed
            };
            resolve_attestation(ctx, &right, status, 1).await?;
            right.status = status;
            ctx.cache.put_right(right);
        }
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let level = ctx.level;
        let round = ctx.block()?.payload_round;

        for mut right in attestation_rights(ctx, level - 1).await? {
            if right.status == RightStatus::Future {
                continue;
            }
            resolve_attestation(ctx, &right, right.status, -1).await?;
            right.status = RightStatus::Future;
            ctx.cache.put_right(right);
        }

        for r in (1..=round).rev() {
            if let Some(right) = ctx.cache.right(ctx.store, baking_key(level, r)).await? {
                resolve_baking(ctx, &right, right.status, -1, false).await?;
                ctx.cache.remove_right(right.key());
            }
        }

        if let Some(mut right) = ctx.cache.right(ctx.store, baking_key(level, 0)).await? {
            if right.status != RightStatus::Future {
                resolve_baking(ctx, &right, right.status, -1, true).await?;
                right.status = RightStatus::Future;
                ctx.cache.put_right(right);
            }
        }
        Ok(())
    }
}

fn baking_key(level: i64, round: i32) -> RightKey {
    RightKey {
        level,
        kind: RightKind::Baking,
        slot: round as i64,
    }
}

pub(crate) async fn attestation_rights(
    ctx: &mut LevelContext<'_>,
    level: i64,
) -> Result<Vec<BakingRight>, IndexerError> {
    if level < 0 {
        return Ok(Vec::new());
    }
    Ok(ctx
        .cache
        .rights_at(ctx.store, level)
        .await?
        .into_iter()
        .filter(|r| r.kind == RightKind::Attestation)
        .collect())
}

/// Move a baking right's counts out of (or back into) `future_blocks`.
/// `scheduled` is true for round-0 rights, which were counted as future.
async fn resolve_baking(
    ctx: &mut LevelContext<'_>,
    right: &BakingRight,
    status: RightStatus,
    sign: i32,
    scheduled: bool,
) -> Result<(), IndexerError> {
    ctx.update_baker_cycle(right.cycle, right.baker_id, |bc| {
        if scheduled {
            bc.future_blocks -= sign;
        }
        match status {
            RightStatus::Realized => bc.blocks += sign,
            RightStatus::Missed => bc.missed_blocks += sign,
            RightStatus::Future => {}
        }
    })
    .await
}

async fn resolve_attestation(
    ctx: &mut LevelContext<'_>,
    right: &BakingRight,
    status: RightStatus,
    sign: i32,
) -> Result<(), IndexerError> {
    let slots = right.slots.unwrap_or(0) * sign;
    ctx.update_baker_cycle(right.cycle, right.baker_id, |bc| {
        bc.future_attestations -= slots;
        match status {
            RightStatus::Realized => bc.attestations += slots,
            RightStatus::Missed => bc.missed_attestations += slots,
            RightStatus::Future => {}
        }
    })
    .await
}
