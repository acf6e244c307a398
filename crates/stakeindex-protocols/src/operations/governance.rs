//! Proposals and ballots.
//!
//! Tallies are kept on the period row as operations arrive; the voting
//! stage decides the outcome at the end of the period.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{
    Operation, OperationBody, OperationKind, PeriodKind, Vote, VoterStatus, VotingPeriod, VotingSnapshot,
};
use stakeindex_core::raw::RawOperation;

use super::{row, unexpected_body};
use crate::context::LevelContext;
use crate::handler::OperationHandler;

async fn current_period(
    ctx: &mut LevelContext<'_>,
    raw: &RawOperation,
    period: i64,
    kind: &[PeriodKind],
) -> Result<VotingPeriod, IndexerError> {
    if period != ctx.state.voting_period {
        return Err(IndexerError::Validation {
            level: ctx.level,
            reason: format!(
                "{} {} targets period {period}, current is {}",
                raw.kind, raw.hash, ctx.state.voting_period
            ),
            rebase_required: false,
        });
    }
    let p = period_row(ctx, period).await?;
    if !kind.contains(&p.kind) {
        return Err(IndexerError::Validation {
            level: ctx.level,
            reason: format!("{} {} not allowed in a {:?} period", raw.kind, raw.hash, p.kind),
            rebase_required: false,
        });
    }
    Ok(p)
}

async fn period_row(ctx: &mut LevelContext<'_>, period: i64) -> Result<VotingPeriod, IndexerError> {
    ctx.cache
        .voting_period(ctx.store, period)
        .await?
        .ok_or_else(|| IndexerError::missing("voting period", period))
}

async fn voter(ctx: &mut LevelContext<'_>, period: i64, baker_id: i64) -> Result<VotingSnapshot, IndexerError> {
    ctx.cache
        .voting_snapshot(ctx.store, period, baker_id)
        .await?
        .ok_or_else(|| IndexerError::missing("voter", format!("{baker_id} in period {period}")))
}

// ─── Proposals ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProposalsContent {
    source: String,
    period: i64,
    proposals: Vec<String>,
}

pub struct ProposalsHandler;

#[async_trait]
impl OperationHandler for ProposalsHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Proposals
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: ProposalsContent = raw.decode()?;
        let mut period = current_period(ctx, raw, content.period, &[PeriodKind::Proposal]).await?;
        let baker = ctx.baker_at(&content.source).await?;
        let mut snapshot = voter(ctx, period.index, baker.id).await?;

        for proposal in &content.proposals {
            *period.upvotes.entry(proposal.clone()).or_insert(0) += snapshot.voting_power;
        }
        let prev_status = snapshot.status;
        let voting_power = snapshot.voting_power;
        snapshot.status = VoterStatus::Upvoted;
        ctx.cache.put_voting_snapshot(snapshot);
        ctx.cache.put_voting_period(period);

        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::Proposals {
                baker_id: baker.id,
                period: content.period,
                proposals: content.proposals,
                voting_power,
                prev_status,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let OperationBody::Proposals {
            baker_id,
            period,
            ref proposals,
            voting_power,
            prev_status,
        } = op.body
        else {
            return Err(unexpected_body(op));
        };
        let mut p = period_row(ctx, period).await?;
        for proposal in proposals {
            if let Some(votes) = p.upvotes.get_mut(proposal) {
                *votes -= voting_power;
                if *votes <= 0 {
                    p.upvotes.remove(proposal);
                }
            }
        }
        ctx.cache.put_voting_period(p);
        let mut snapshot = voter(ctx, period, baker_id).await?;
        snapshot.status = prev_status;
        ctx.cache.put_voting_snapshot(snapshot);
        Ok(())
    }
}

// ─── Ballot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BallotContent {
    source: String,
    period: i64,
    proposal: String,
    ballot: Vote,
}

pub struct BallotHandler;

fn tally(period: &mut VotingPeriod, vote: Vote, power: i64) {
    match vote {
        Vote::Yay => period.yay_power += power,
        Vote::Nay => period.nay_power += power,
        Vote::Pass => period.pass_power += power,
    }
}

#[async_trait]
impl OperationHandler for BallotHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Ballot
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: BallotContent = raw.decode()?;
        let mut period = current_period(
            ctx,
            raw,
            content.period,
            &[PeriodKind::Exploration, PeriodKind::Promotion],
        )
        .await?;
        let baker = ctx.baker_at(&content.source).await?;
        let mut snapshot = voter(ctx, period.index, baker.id).await?;
        if snapshot.status != VoterStatus::None {
            return Err(IndexerError::Validation {
                level: ctx.level,
                reason: format!("baker {} already voted in period {}", baker.address, period.index),
                rebase_required: false,
            });
        }
        tally(&mut period, content.ballot, snapshot.voting_power);
        let voting_power = snapshot.voting_power;
        snapshot.status = content.ballot.into();
        ctx.cache.put_voting_snapshot(snapshot);
        ctx.cache.put_voting_period(period);

        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::Ballot {
                baker_id: baker.id,
                period: content.period,
                proposal: content.proposal,
                vote: content.ballot,
                voting_power,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let OperationBody::Ballot {
            baker_id,
            period,
            vote,
            voting_power,
            ..
        } = op.body
        else {
            return Err(unexpected_body(op));
        };
        let mut p = period_row(ctx, period).await?;
        tally(&mut p, vote, -voting_power);
        ctx.cache.put_voting_period(p);
        let mut snapshot = voter(ctx, period, baker_id).await?;
        snapshot.status = VoterStatus::None;
        ctx.cache.put_voting_snapshot(snapshot);
        Ok(())
    }
}
