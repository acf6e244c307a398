//! Rights, cycle ledgers, voting periods and protocol upgrades.

mod common;

use stakeindex_core::config::{V1_PROTOCOL, V2_PROTOCOL};
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{PeriodKind, PeriodStatus, RightKind, RightStatus};
use stakeindex_core::store::IndexStore;
use stakeindex_protocols::EngineOptions;
use stakeindex_testkit::fixtures::{self, BAKERS};
use stakeindex_testkit::ChainBuilder;

use common::{replica, scripted_chain, sync_to, V2_LEVEL};

const COMMITTEE: i32 = 16;

#[tokio::test]
async fn every_past_level_has_resolved_rights() {
    let chain = scripted_chain().await;
    let store = chain.store();
    let absent = chain.account(BAKERS[3]).await.unwrap().unwrap().id;

    for level in 2..chain.level() {
        let block = store.block(level).await.unwrap().unwrap();
        let rights = store.rights_at(level).await.unwrap();

        let baking: Vec<_> = rights.iter().filter(|r| r.kind == RightKind::Baking).collect();
        let realized: Vec<_> = baking.iter().filter(|r| r.status == RightStatus::Realized).collect();
        assert_eq!(realized.len(), 1, "level {level}");
        assert_eq!(realized[0].round, Some(block.payload_round));
        assert_eq!(Some(realized[0].baker_id), block.proposer_id);
        assert_eq!(baking.len() as i32, block.payload_round + 1, "level {level}");

        let attestations: Vec<_> = rights.iter().filter(|r| r.kind == RightKind::Attestation).collect();
        let slots: i32 = attestations.iter().map(|r| r.slots.unwrap_or(0)).sum();
        assert_eq!(slots, COMMITTEE, "level {level}");
        for r in attestations {
            let expected = if level == 8 && r.baker_id == absent {
                RightStatus::Missed
            } else {
                RightStatus::Realized
            };
            assert_eq!(r.status, expected, "level {level} baker {}", r.baker_id);
        }
    }

    let head_rights = store.rights_at(chain.level()).await.unwrap();
    assert!(head_rights
        .iter()
        .filter(|r| r.kind == RightKind::Attestation)
        .all(|r| r.status == RightStatus::Future));
}

#[tokio::test]
async fn finished_cycle_ledgers_have_no_future_rights() {
    let chain = scripted_chain().await;
    let store = chain.store();
    let ledgers = store.baker_cycles(1).await.unwrap();
    assert!(!ledgers.is_empty());

    let sum = |f: fn(&stakeindex_core::model::BakerCycle) -> i32| ledgers.iter().map(f).sum::<i32>();
    assert_eq!(sum(|bc| bc.future_blocks), 0);
    assert_eq!(sum(|bc| bc.future_attestations), 0);
    // Eight levels, one of them baked at round 1 after a missed round 0.
    assert_eq!(sum(|bc| bc.blocks), 8);
    assert_eq!(sum(|bc| bc.missed_blocks), 1);
    assert_eq!(sum(|bc| bc.attestations), 8 * COMMITTEE);
    assert_eq!(sum(|bc| bc.missed_attestations), 0);

    let rewards: i64 = ledgers
        .iter()
        .map(|bc| {
            bc.block_rewards_delegated
                + bc.block_rewards_staked_own
                + bc.block_rewards_staked_edge
                + bc.block_rewards_staked_shared
        })
        .sum();
    assert!(rewards > 0);
}

#[tokio::test]
async fn upcoming_cycles_are_generated_ahead() {
    let chain = scripted_chain().await;
    let store = chain.store();
    let protocol = store.protocol(V2_PROTOCOL).await.unwrap().unwrap();
    let current = protocol.cycle_of(chain.level());
    let last = current + protocol.constants.rights_delay;

    for index in 0..=last {
        let cycle = store.cycle(index).await.unwrap().unwrap_or_else(|| panic!("cycle {index}"));
        assert_eq!(cycle.first_level, protocol.cycle_first_level(index).max(1));
        let snapshots = store.snapshot_balances(index).await.unwrap();
        assert_eq!(snapshots.len() as i32, cycle.total_bakers);
        assert_eq!(store.baker_cycles(index).await.unwrap().len(), snapshots.len());
    }
    assert!(store.cycle(last + 1).await.unwrap().is_none());

    let future = store.rights_in_cycle(last).await.unwrap();
    let round0 = future
        .iter()
        .filter(|r| r.kind == RightKind::Baking && r.round == Some(0))
        .count();
    assert_eq!(round0 as i64, protocol.constants.blocks_per_cycle);
    assert!(future.iter().all(|r| r.status == RightStatus::Future));
}

#[tokio::test]
async fn upgrade_extends_rights_horizon() {
    let chain = scripted_chain().await;
    let store = chain.store();
    let v1 = store.protocol(V1_PROTOCOL).await.unwrap().unwrap();
    let v2 = store.protocol(V2_PROTOCOL).await.unwrap().unwrap();
    assert_eq!(v1.last_level, Some(V2_LEVEL - 1));
    assert_eq!(v2.first_level, V2_LEVEL);
    assert_eq!(v2.code, v1.code + 1);
    assert_eq!(v2.first_cycle, v1.cycle_of(V2_LEVEL));
    assert_eq!(v2.constants.rights_delay, v1.constants.rights_delay + 1);

    // The upgrade generated the cycle its longer delay needs at once.
    let extra = v2.first_cycle + v2.constants.rights_delay;
    assert_eq!(store.cycle(extra).await.unwrap().unwrap().generated_level, V2_LEVEL);
    assert_eq!(store.block(V2_LEVEL).await.unwrap().unwrap().protocol_code, v2.code);

    // Reverting the upgrade takes all of it back.
    let (replica_store, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &chain.node(), V2_LEVEL).await;
    engine.revert().await.unwrap();
    assert!(replica_store.protocol(V2_PROTOCOL).await.unwrap().is_none());
    assert!(replica_store.cycle(extra).await.unwrap().is_none());
    assert_eq!(
        replica_store.protocol(V1_PROTOCOL).await.unwrap().unwrap().last_level,
        None
    );
    assert_eq!(engine.state().next_protocol, V2_PROTOCOL);
}

#[tokio::test]
async fn voting_periods_follow_the_proposal() {
    let chain = scripted_chain().await;
    let store = chain.store();

    let first = store.voting_period(0).await.unwrap().unwrap();
    assert_eq!(first.kind, PeriodKind::Proposal);
    assert_eq!(first.status, PeriodStatus::Success);
    assert_eq!(first.proposal.as_deref(), Some("PtNext"));
    assert!(first.upvotes["PtNext"] > 0);

    let exploration = store.voting_period(1).await.unwrap().unwrap();
    assert_eq!(exploration.kind, PeriodKind::Exploration);
    assert_eq!(exploration.first_level, first.last_level + 1);
    assert_eq!(exploration.proposal.as_deref(), Some("PtNext"));
    assert_eq!(exploration.status, PeriodStatus::NoQuorum);

    let next = store.voting_period(2).await.unwrap().unwrap();
    assert_eq!(next.kind, PeriodKind::Proposal);
    assert_eq!(next.epoch, 1);
    assert_eq!(chain.state().voting_period, 2);
    assert!(!store.voting_snapshots(2).await.unwrap().is_empty());
}

/// Constants doubling the cycle length.
fn long_cycles() -> stakeindex_core::raw::RawConstants {
    let mut c = fixtures::constants();
    c.blocks_per_cycle = 16;
    c
}

#[tokio::test]
async fn cycle_length_change_on_boundary_round_trips() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_until(14).await.unwrap();
    // Announced at 15, active from 16: the first level of cycle 2.
    chain.announce(V2_PROTOCOL, long_cycles());
    chain.bake_until(50).await.unwrap();

    let store = chain.store();
    let v2 = store.protocol(V2_PROTOCOL).await.unwrap().unwrap();
    assert_eq!(v2.first_level, 16);
    assert_eq!(v2.first_cycle, 2);
    assert_eq!(v2.first_cycle_level, 16);
    assert_eq!(store.cycle(3).await.unwrap().unwrap().first_level, 32);
    assert_eq!(chain.state().cycle, 4);

    let node = chain.node();
    let (replica_store, mut engine) = replica(&chain, EngineOptions::default()).await;
    let mut dumps = Vec::new();
    for level in 0..=node.head_level() {
        engine.commit(&node.block_at(level).unwrap()).await.unwrap();
        dumps.push(replica_store.dump());
    }
    for level in (1..=node.head_level()).rev() {
        engine.revert().await.unwrap();
        let expected = &dumps[(level - 1) as usize];
        let actual = replica_store.dump();
        assert!(
            actual == *expected,
            "revert of level {level} left {:?} different",
            actual.diff(expected)
        );
    }
    assert!(replica_store.protocol(V2_PROTOCOL).await.unwrap().is_none());
}

#[tokio::test]
async fn cycle_length_change_inside_a_cycle_is_unsupported() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_until(12).await.unwrap();
    // Active from 14, in the middle of cycle 1.
    chain.announce(V2_PROTOCOL, long_cycles());
    chain.bake_empty().await.unwrap();

    let err = chain.bake_empty().await.unwrap_err();
    assert!(matches!(err, IndexerError::UnsupportedMigration(_)), "{err}");
    assert!(err.is_fatal());
    assert_eq!(chain.level(), 13);
    assert_eq!(chain.node().head_level(), 13);
    assert!(chain.store().protocol(V2_PROTOCOL).await.unwrap().is_none());
}
