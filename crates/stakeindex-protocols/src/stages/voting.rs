//! Closes voting periods and opens the next one.
//!
//! Ballots and upvotes are tallied by the operation handlers as they
//! arrive; this stage only acts on the last level of a period.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{
    BlockEvents, PeriodKind, PeriodStatus, ProtocolConstants, VoterStatus, VotingPeriod, VotingSnapshot,
};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};
use crate::rights::is_active;

/// Ballots needed in favour, out of yay + nay, in percent.
const SUPERMAJORITY_PERCENT: i64 = 80;

pub struct VotingStage;

#[async_trait]
impl CommitStage for VotingStage {
    fn name(&self) -> &'static str {
        "voting"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        if !ctx.block()?.events.contains(BlockEvents::VOTING_PERIOD_END) {
            return Ok(StageOutcome::Skipped);
        }
        let mut period = ctx
            .cache
            .voting_period(ctx.store, ctx.state.voting_period)
            .await?
            .ok_or_else(|| IndexerError::missing("voting period", ctx.state.voting_period))?;
        let constants = ctx.constants()?.clone();

        let (status, winner) = close(&period, &constants);
        period.status = status;
        if period.kind == PeriodKind::Proposal {
            period.proposal = winner.clone();
        }
        let (kind, epoch, proposal) = successor(&period, status);
        tracing::info!(
            level = ctx.level,
            period = period.index,
            kind = ?period.kind,
            status = ?status,
            next = ?kind,
            "Voting period closed"
        );
        let next = open_period(ctx, period.index + 1, epoch, kind, ctx.level + 1, proposal, &constants).await?;
        ctx.cache.put_voting_period(period);
        ctx.state.voting_period = next.index;
        ctx.state.voting_epoch = next.epoch;
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        if !ctx.block()?.events.contains(BlockEvents::VOTING_PERIOD_END) {
            return Ok(());
        }
        let opened = ctx.state.voting_period;
        remove_period(ctx, opened).await?;

        let closed = opened - 1;
        let mut period = ctx
            .cache
            .voting_period(ctx.store, closed)
            .await?
            .ok_or_else(|| IndexerError::missing("voting period", closed))?;
        period.status = PeriodStatus::Active;
        if period.kind == PeriodKind::Proposal {
            period.proposal = None;
        }
        ctx.state.voting_period = period.index;
        ctx.state.voting_epoch = period.epoch;
        ctx.cache.put_voting_period(period);
        Ok(())
    }
}

/// Outcome of a period and, for proposal periods, the winning proposal.
pub(crate) fn close(period: &VotingPeriod, constants: &ProtocolConstants) -> (PeriodStatus, Option<String>) {
    let total = period.total_voting_power as i128;
    match period.kind {
        PeriodKind::Proposal => {
            let Some(max) = period.upvotes.values().copied().max() else {
                return (PeriodStatus::NoProposals, None);
            };
            let leaders: Vec<&String> = period
                .upvotes
                .iter()
                .filter(|(_, v)| **v == max)
                .map(|(p, _)| p)
                .collect();
            if max as i128 * 10_000 >= total * constants.proposal_quorum as i128 && leaders.len() == 1 {
                (PeriodStatus::Success, Some(leaders[0].clone()))
            } else {
                (PeriodStatus::NoQuorum, None)
            }
        }
        PeriodKind::Exploration | PeriodKind::Promotion => {
            if (period.ballots_power() as i128) * 10_000 < total * constants.ballot_quorum as i128 {
                return (PeriodStatus::NoQuorum, None);
            }
            let cast = period.yay_power + period.nay_power;
            if cast > 0 && period.yay_power * 100 >= cast * SUPERMAJORITY_PERCENT {
                (PeriodStatus::Success, None)
            } else {
                (PeriodStatus::NoSupermajority, None)
            }
        }
        PeriodKind::Cooldown | PeriodKind::Adoption => (PeriodStatus::Success, None),
    }
}

/// Kind, epoch and proposal of the period that follows.
fn successor(period: &VotingPeriod, status: PeriodStatus) -> (PeriodKind, i64, Option<String>) {
    let restart = (PeriodKind::Proposal, period.epoch + 1, None);
    match (period.kind, status) {
        (PeriodKind::Proposal, PeriodStatus::Success) => {
            (PeriodKind::Exploration, period.epoch, period.proposal.clone())
        }
        (PeriodKind::Exploration, PeriodStatus::Success) => {
            (PeriodKind::Cooldown, period.epoch, period.proposal.clone())
        }
        (PeriodKind::Cooldown, _) => (PeriodKind::Promotion, period.epoch, period.proposal.clone()),
        (PeriodKind::Promotion, PeriodStatus::Success) => {
            (PeriodKind::Adoption, period.epoch, period.proposal.clone())
        }
        _ => restart,
    }
}

/// Create a period and its voter snapshot from the current balances.
pub(crate) async fn open_period(
    ctx: &mut LevelContext<'_>,
    index: i64,
    epoch: i64,
    kind: PeriodKind,
    first_level: i64,
    proposal: Option<String>,
    constants: &ProtocolConstants,
) -> Result<VotingPeriod, IndexerError> {
    let mut total_voting_power = 0;
    let mut total_bakers = 0;
    for id in ctx.cache.baker_ids(ctx.store).await? {
        let baker = ctx.account(id).await?;
        if !is_active(&baker, constants) {
            continue;
        }
        let voting_power = baker.baking_power(constants.limit_of_delegation);
        total_voting_power += voting_power;
        total_bakers += 1;
        ctx.cache.put_voting_snapshot(VotingSnapshot {
            period: index,
            baker_id: id,
            voting_power,
            status: VoterStatus::None,
        });
    }
    let period = VotingPeriod {
        index,
        epoch,
        kind,
        first_level,
        last_level: first_level + constants.voting_period_length() - 1,
        status: PeriodStatus::Active,
        proposal,
        total_voting_power,
        total_bakers,
        upvotes: Default::default(),
        yay_power: 0,
        nay_power: 0,
        pass_power: 0,
    };
    ctx.cache.put_voting_period(period.clone());
    Ok(period)
}

pub(crate) async fn remove_period(ctx: &mut LevelContext<'_>, index: i64) -> Result<(), IndexerError> {
    for s in ctx.cache.voting_snapshots(ctx.store, index).await? {
        ctx.cache.remove_voting_snapshot(s.period, s.baker_id);
    }
    ctx.cache.remove_voting_period(index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn constants() -> ProtocolConstants {
        ProtocolConstants {
            blocks_per_cycle: 8,
            rights_delay: 2,
            committee_size: 16,
            consensus_threshold: 11,
            cycles_per_voting_period: 2,
            minimal_stake: 1_000,
            limit_of_delegation: 9,
            edge_of_staking_billionth: 0,
            baking_reward_fixed: 0,
            baking_reward_bonus_per_slot: 0,
            attesting_reward_per_slot: 0,
            nonce_revelation_tip: 0,
            double_baking_slashed_percent: 0,
            double_attestation_slashed_percent: 0,
            allocation_burn: 0,
            proposal_quorum: 500,
            ballot_quorum: 2_000,
        }
    }

    fn period(kind: PeriodKind) -> VotingPeriod {
        VotingPeriod {
            index: 3,
            epoch: 1,
            kind,
            first_level: 49,
            last_level: 64,
            status: PeriodStatus::Active,
            proposal: Some("P1".into()),
            total_voting_power: 10_000,
            total_bakers: 4,
            upvotes: BTreeMap::new(),
            yay_power: 0,
            nay_power: 0,
            pass_power: 0,
        }
    }

    #[test]
    fn proposal_outcomes() {
        let mut p = period(PeriodKind::Proposal);
        assert_eq!(close(&p, &constants()), (PeriodStatus::NoProposals, None));

        p.upvotes.insert("PA".into(), 400);
        assert_eq!(close(&p, &constants()).0, PeriodStatus::NoQuorum);

        p.upvotes.insert("PA".into(), 600);
        assert_eq!(close(&p, &constants()), (PeriodStatus::Success, Some("PA".into())));

        p.upvotes.insert("PB".into(), 600);
        assert_eq!(close(&p, &constants()).0, PeriodStatus::NoQuorum);
    }

    #[test]
    fn ballot_outcomes() {
        let mut p = period(PeriodKind::Exploration);
        p.yay_power = 1_000;
        assert_eq!(close(&p, &constants()).0, PeriodStatus::NoQuorum);

        p.yay_power = 1_500;
        p.nay_power = 500;
        assert_eq!(close(&p, &constants()).0, PeriodStatus::NoSupermajority);

        p.yay_power = 1_600;
        p.nay_power = 400;
        assert_eq!(close(&p, &constants()).0, PeriodStatus::Success);

        p.yay_power = 0;
        p.nay_power = 0;
        p.pass_power = 3_000;
        assert_eq!(close(&p, &constants()).0, PeriodStatus::NoSupermajority);
    }

    #[test]
    fn successors() {
        let p = period(PeriodKind::Exploration);
        assert_eq!(
            successor(&p, PeriodStatus::Success),
            (PeriodKind::Cooldown, 1, Some("P1".into()))
        );
        assert_eq!(successor(&p, PeriodStatus::NoQuorum), (PeriodKind::Proposal, 2, None));
        let p = period(PeriodKind::Adoption);
        assert_eq!(successor(&p, PeriodStatus::Success), (PeriodKind::Proposal, 2, None));
        let p = period(PeriodKind::Cooldown);
        assert_eq!(
            successor(&p, PeriodStatus::Success),
            (PeriodKind::Promotion, 1, Some("P1".into()))
        );
    }
}
