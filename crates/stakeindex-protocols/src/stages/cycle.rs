//! Cycle generation.
//!
//! At the first level of cycle `c` the stage takes a snapshot of every
//! active baker and generates cycle `c + rights_delay`: its row, the
//! snapshot balances, all round-0 baking rights and attestation
//! committees, and one baker-cycle ledger per snapshot entry. Cycles are
//! tagged with the level that generated them so a revert removes exactly
//! what that level added.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{BlockEvents, Cycle, Protocol, SnapshotBalance};

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};
use crate::rights::{generate, is_active};

pub struct CycleStage;

#[async_trait]
impl CommitStage for CycleStage {
    fn name(&self) -> &'static str {
        "cycle"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let protocol = ctx.protocol()?.clone();
        if !protocol.is_cycle_start(ctx.level) {
            return Ok(StageOutcome::Skipped);
        }
        let target = protocol.cycle_of(ctx.level) + protocol.constants.rights_delay;
        if ctx.cache.cycle(ctx.store, target).await?.is_some() {
            return Ok(StageOutcome::Skipped);
        }
        let cycle = generate_cycle(ctx, target, ctx.level - 1, i64::MIN).await?;
        tracing::debug!(
            level = ctx.level,
            cycle = cycle.index,
            bakers = cycle.total_bakers,
            "Generated cycle"
        );
        ctx.update_block(|b| b.events.insert(BlockEvents::SNAPSHOT))?;
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let protocol = ctx.protocol()?.clone();
        if !protocol.is_cycle_start(ctx.level) {
            return Ok(());
        }
        let target = protocol.cycle_of(ctx.level) + protocol.constants.rights_delay;
        remove_cycle_generated_at(ctx, target, ctx.level).await?;
        Ok(())
    }
}

// ─── Shared with migrations ──────────────────────────────────────────────────

/// Snapshot of every active baker, by ascending id.
pub(crate) async fn capture_snapshots(
    ctx: &mut LevelContext<'_>,
    cycle: i64,
    protocol: &Protocol,
) -> Result<Vec<SnapshotBalance>, IndexerError> {
    let mut snapshots = Vec::new();
    for id in ctx.cache.baker_ids(ctx.store).await? {
        let baker = ctx.account(id).await?;
        if is_active(&baker, &protocol.constants) {
            snapshots.push(SnapshotBalance::capture(cycle, &baker, protocol.constants.limit_of_delegation));
        }
    }
    Ok(snapshots)
}

/// Generate cycle `index` under the context's protocol from the current
/// balances. Rights start at `from_level` when it falls inside the cycle.
pub(crate) async fn generate_cycle(
    ctx: &mut LevelContext<'_>,
    index: i64,
    snapshot_level: i64,
    from_level: i64,
) -> Result<Cycle, IndexerError> {
    let protocol = ctx.protocol()?.clone();
    let seed = ctx.seed(index).await?;
    let snapshots = capture_snapshots(ctx, index, &protocol).await?;

    let cycle = Cycle {
        index,
        first_level: protocol.cycle_first_level(index),
        last_level: protocol.cycle_last_level(index),
        snapshot_level,
        seed,
        total_baking_power: snapshots.iter().map(|s| s.baking_power).sum(),
        total_bakers: snapshots.len() as i32,
        total_staked: snapshots.iter().map(|s| s.staked()).sum(),
        total_delegated: snapshots.iter().map(|s| s.own_delegated + s.external_delegated).sum(),
        generated_level: ctx.level,
    };
    layout_rights(ctx, &cycle, &snapshots, from_level, protocol.constants.committee_size)?;
    for s in snapshots {
        ctx.cache.put_snapshot_balance(s);
    }
    ctx.cache.put_cycle(cycle.clone());
    Ok(cycle)
}

/// Write the rights and fresh baker-cycle ledgers of `cycle`.
pub(crate) fn layout_rights(
    ctx: &mut LevelContext<'_>,
    cycle: &Cycle,
    snapshots: &[SnapshotBalance],
    from_level: i64,
    committee_size: i32,
) -> Result<(), IndexerError> {
    let first = cycle.first_level.max(from_level);
    let generated = generate(cycle, snapshots, committee_size, first..=cycle.last_level)?;
    ctx.cache.mark_rights_loaded(cycle.first_level..=cycle.last_level);
    for right in generated.rights {
        ctx.cache.put_right(right);
    }
    for bc in generated.baker_cycles {
        ctx.cache.put_baker_cycle(bc);
    }
    Ok(())
}

/// Delete a cycle with everything generated for it.
pub(crate) async fn remove_cycle(ctx: &mut LevelContext<'_>, cycle: &Cycle) -> Result<(), IndexerError> {
    for s in ctx.cache.snapshot_balances(ctx.store, cycle.index).await? {
        ctx.cache.remove_snapshot_balance(s.cycle, s.baker_id);
    }
    for bc in ctx.cache.baker_cycles(ctx.store, cycle.index).await? {
        ctx.cache.remove_baker_cycle(bc.cycle, bc.baker_id);
    }
    ctx.cache.clear_cycle_rights(cycle.index, cycle.first_level..=cycle.last_level);
    ctx.cache.remove_cycle(cycle.index);
    Ok(())
}

/// Remove cycle `index` if it was generated at `level`. Returns whether it
/// was.
pub(crate) async fn remove_cycle_generated_at(
    ctx: &mut LevelContext<'_>,
    index: i64,
    level: i64,
) -> Result<bool, IndexerError> {
    match ctx.cache.cycle(ctx.store, index).await? {
        Some(cycle) if cycle.generated_level == level => {
            remove_cycle(ctx, &cycle).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Move every stored cycle from `first` onward onto the level layout of
/// `protocol` and regenerate its rights from the stored snapshot and seed.
/// No right of those cycles may have been resolved yet.
pub(crate) async fn relayout_cycles(
    ctx: &mut LevelContext<'_>,
    first: i64,
    protocol: &Protocol,
) -> Result<(), IndexerError> {
    let mut index = first;
    while let Some(mut cycle) = ctx.cache.cycle(ctx.store, index).await? {
        let snapshots = ctx.cache.snapshot_balances(ctx.store, index).await?;
        ctx.cache.clear_cycle_rights(index, cycle.first_level..=cycle.last_level);
        for bc in ctx.cache.baker_cycles(ctx.store, index).await? {
            ctx.cache.remove_baker_cycle(bc.cycle, bc.baker_id);
        }
        cycle.first_level = protocol.cycle_first_level(index);
        cycle.last_level = protocol.cycle_last_level(index);
        layout_rights(ctx, &cycle, &snapshots, i64::MIN, protocol.constants.committee_size)?;
        tracing::debug!(
            cycle = index,
            first_level = cycle.first_level,
            last_level = cycle.last_level,
            "Relaid cycle"
        );
        ctx.cache.put_cycle(cycle);
        index += 1;
    }
    Ok(())
}
