//! Settles double-baking and double-attestation evidence.
//!
//! The offender loses a percentage of its own and external stake; half of
//! the loss goes to the accuser (the block proposer) and the rest is
//! burned. Amounts are written back onto the evidence operation so that
//! revert can undo them without recomputing.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{OperationBody, Slashing};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};
use crate::rounding::mul_div;

pub struct SlashingStage;

#[derive(Clone, Copy)]
enum Offence {
    DoubleBaking,
    DoubleAttestation,
}

fn evidence(body: &OperationBody) -> Option<(Offence, &Slashing)> {
    match body {
        OperationBody::DoubleBaking(s) => Some((Offence::DoubleBaking, s)),
        OperationBody::DoubleAttestation(s) => Some((Offence::DoubleAttestation, s)),
        _ => None,
    }
}

#[async_trait]
impl CommitStage for SlashingStage {
    fn name(&self) -> &'static str {
        "slashing"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let mut applied = false;
        for i in 0..ctx.operations.len() {
            let Some((offence, slashing)) = evidence(&ctx.operations[i].body) else {
                continue;
            };
            let mut slashing = slashing.clone();
            let constants = ctx.constants()?.clone();
            let percent = match offence {
                Offence::DoubleBaking => constants.double_baking_slashed_percent,
                Offence::DoubleAttestation => constants.double_attestation_slashed_percent,
            };
            let rounding = ctx.rules().slashing;
            let offender = ctx.account(slashing.offender_id).await?;
            slashing.lost_staked = mul_div(offender.own_staked_balance, percent, 100, rounding).0;
            slashing.lost_external_staked = mul_div(offender.external_staked_balance, percent, 100, rounding).0;
            let total = slashing.lost_staked + slashing.lost_external_staked;
            slashing.reward = total / 2;
            slashing.burned = total - slashing.reward;

            settle(ctx, offence, &slashing, 1).await?;

            let op = &mut ctx.operations[i];
            op.body = match offence {
                Offence::DoubleBaking => OperationBody::DoubleBaking(slashing.clone()),
                Offence::DoubleAttestation => OperationBody::DoubleAttestation(slashing.clone()),
            };
            let op = op.clone();
            tracing::info!(
                level = ctx.level,
                offender = slashing.offender_id,
                accuser = slashing.accuser_id,
                lost = total,
                "Slashed baker"
            );
            ctx.cache.put_operation(op);
            applied = true;
        }
        Ok(if applied {
            StageOutcome::Applied
        } else {
            StageOutcome::Skipped
        })
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let found: Vec<(Offence, Slashing)> = ctx
            .operations
            .iter()
            .rev()
            .filter_map(|op| evidence(&op.body).map(|(o, s)| (o, s.clone())))
            .collect();
        for (offence, slashing) in found {
            settle(ctx, offence, &slashing, -1).await?;
        }
        Ok(())
    }
}

async fn settle(
    ctx: &mut LevelContext<'_>,
    offence: Offence,
    slashing: &Slashing,
    sign: i64,
) -> Result<(), IndexerError> {
    let lost_staked = slashing.lost_staked * sign;
    let lost_external = slashing.lost_external_staked * sign;
    let reward = slashing.reward * sign;
    let burned = slashing.burned * sign;

    let mut offender = ctx.account(slashing.offender_id).await?;
    offender.balance -= lost_staked;
    offender.own_staked_balance -= lost_staked;
    offender.external_staked_balance -= lost_external;
    ctx.put_account(offender);

    ctx.change_balance(slashing.accuser_id, reward).await?;
    ctx.update_statistics(|s| s.total_burned += burned).await?;

    let protocol = ctx.protocol()?.clone();
    let accused_cycle = protocol.cycle_of(slashing.accused_level);
    let current_cycle = protocol.cycle_of(ctx.level);
    ctx.update_baker_cycle(accused_cycle, slashing.offender_id, |bc| match offence {
        Offence::DoubleBaking => {
            bc.double_baking_lost_staked += lost_staked;
            bc.double_baking_lost_external_staked += lost_external;
        }
        Offence::DoubleAttestation => {
            bc.double_attestation_lost_staked += lost_staked;
            bc.double_attestation_lost_external_staked += lost_external;
        }
    })
    .await?;
    ctx.update_baker_cycle_if_present(current_cycle, slashing.accuser_id, |bc| match offence {
        Offence::DoubleBaking => bc.double_baking_rewards += reward,
        Offence::DoubleAttestation => bc.double_attestation_rewards += reward,
    })
    .await?;
    Ok(())
}
