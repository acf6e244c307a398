//! Balance effects of operations, checked on the oracle's store.

mod common;

use stakeindex_core::config::V2_PROTOCOL;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{OperationBody, OperationKind, OperationStatus};
use stakeindex_core::store::IndexStore;
use stakeindex_testkit::fixtures::{self, ops, BAKERS, USERS};
use stakeindex_testkit::{BlockSpec, ChainBuilder};

use common::{scripted_chain, FRESH};

/// A chain already running the staking protocol, still in cycle 0.
async fn staking_chain() -> ChainBuilder {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.announce(V2_PROTOCOL, fixtures::constants());
    chain.bake_until(3).await.unwrap();
    assert_eq!(chain.state().protocol, V2_PROTOCOL);
    chain
}

#[tokio::test]
async fn supply_is_conserved() {
    let chain = scripted_chain().await;
    let store = chain.store();
    let stats = store.statistics(chain.level()).await.unwrap().unwrap();
    let held = store.supply_totals().await.unwrap();
    assert_eq!(stats.total_supply(), held.total());
    assert!(stats.total_created > 0);
    assert!(stats.total_burned > 0);
    assert_eq!(stats.total_activated, 2_000_000_000);
}

#[tokio::test]
async fn transaction_allocates_and_burns() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    let store = chain.store();
    let sender_before = chain.account(USERS[2]).await.unwrap().unwrap();
    let burned_before = store.statistics(2).await.unwrap().unwrap().total_burned;

    chain
        .bake(BlockSpec::new().op(ops::transaction(USERS[2], FRESH, 1_000_000, 1_500)))
        .await
        .unwrap();

    let sender = chain.account(USERS[2]).await.unwrap().unwrap();
    let target = chain.account(FRESH).await.unwrap().unwrap();
    assert_eq!(target.balance, 1_000_000);
    assert_eq!(target.first_level, 3);
    assert_eq!(sender.balance, sender_before.balance - 1_000_000 - 64_250 - 1_500);
    assert_eq!(sender.counter, 1);
    let burned = store.statistics(3).await.unwrap().unwrap().total_burned;
    assert_eq!(burned - burned_before, 64_250);
    assert_eq!(store.block(3).await.unwrap().unwrap().fees, 1_500);
}

#[tokio::test]
async fn delegator_balance_moves_with_delegate() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    let b1 = chain.account(BAKERS[0]).await.unwrap().unwrap();
    let b3 = chain.account(BAKERS[2]).await.unwrap().unwrap();
    let user = chain.account(USERS[0]).await.unwrap().unwrap();

    chain
        .bake(BlockSpec::new().op(ops::delegation(USERS[0], Some(BAKERS[2]), 0)))
        .await
        .unwrap();

    let b1_after = chain.account(BAKERS[0]).await.unwrap().unwrap();
    let b3_after = chain.account(BAKERS[2]).await.unwrap().unwrap();
    assert_eq!(
        b1_after.external_delegated_balance,
        b1.external_delegated_balance - user.balance
    );
    assert_eq!(b1_after.delegators_count, b1.delegators_count - 1);
    assert_eq!(
        b3_after.external_delegated_balance,
        b3.external_delegated_balance + user.balance
    );
    assert_eq!(b3_after.delegators_count, b3.delegators_count + 1);
}

#[tokio::test]
async fn failed_operation_only_pays_fee() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    let sender = chain.account(USERS[0]).await.unwrap().unwrap();
    let target = chain.account(USERS[1]).await.unwrap().unwrap();

    chain
        .bake(BlockSpec::new().op(ops::failed(ops::transaction(USERS[0], USERS[1], 5_000, 77))))
        .await
        .unwrap();

    assert_eq!(chain.account(USERS[0]).await.unwrap().unwrap().balance, sender.balance - 77);
    assert_eq!(chain.account(USERS[1]).await.unwrap().unwrap().balance, target.balance);
    let ops = chain.store().operations_at(3).await.unwrap();
    let tx = ops.iter().find(|o| o.kind == OperationKind::Transaction).unwrap();
    assert_eq!(tx.status, OperationStatus::Failed);
    assert_eq!(tx.body, OperationBody::Failed);
    assert_eq!(tx.manager.as_ref().unwrap().fee, 77);
}

#[tokio::test]
async fn unknown_operation_kind_stops_commit() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    let before = chain.store().dump();

    let err = chain
        .bake(BlockSpec::new().op(ops::unknown("smart_rollup_originate")))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::UnsupportedOperation { ref kind, .. } if kind == "smart_rollup_originate"));
    assert_eq!(chain.level(), 2);
    assert!(chain.store().dump() == before);

    // Staking does not exist before the upgrade.
    let err = chain
        .bake(BlockSpec::new().op(ops::stake(USERS[0], 1_000, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::UnsupportedOperation { .. }));
    chain.bake_empty().await.unwrap();
}

#[tokio::test]
async fn double_baking_is_slashed() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(2).await.unwrap();
    let offender_before = chain.account(BAKERS[1]).await.unwrap().unwrap();
    let burned_before = chain.store().statistics(3).await.unwrap().unwrap().total_burned;

    chain
        .bake(BlockSpec::new().op(ops::double_baking(BAKERS[1], 2)))
        .await
        .unwrap();

    let ops = chain.store().operations_at(4).await.unwrap();
    let evidence = ops
        .iter()
        .find_map(|o| match &o.body {
            OperationBody::DoubleBaking(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(evidence.offender_id, offender_before.id);
    assert_eq!(evidence.accused_level, 2);
    assert!(evidence.lost_staked > 0);
    assert_eq!(evidence.lost_external_staked, 0);
    assert_eq!(evidence.reward, (evidence.lost_staked + evidence.lost_external_staked) / 2);
    assert_eq!(
        evidence.reward + evidence.burned,
        evidence.lost_staked + evidence.lost_external_staked
    );

    let offender = chain.account(BAKERS[1]).await.unwrap().unwrap();
    assert!(offender.own_staked_balance < offender_before.own_staked_balance);
    let burned = chain.store().statistics(4).await.unwrap().unwrap().total_burned;
    assert_eq!(burned - burned_before, evidence.burned);
}

#[tokio::test]
async fn evidence_of_future_level_is_rejected() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    let err = chain
        .bake(BlockSpec::new().op(ops::double_attestation(BAKERS[0], 3)))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::Validation { rebase_required: false, .. }));
}

#[tokio::test]
async fn staking_round_trip_returns_funds() {
    let mut chain = staking_chain().await;
    let user = chain.account(USERS[0]).await.unwrap().unwrap();
    let baker = chain.account(BAKERS[0]).await.unwrap().unwrap();

    chain
        .bake(BlockSpec::new().op(ops::stake(USERS[0], 5_000_000_000, 0)))
        .await
        .unwrap();
    let staked = chain.account(USERS[0]).await.unwrap().unwrap();
    let pool = chain.account(BAKERS[0]).await.unwrap().unwrap();
    assert_eq!(staked.balance, user.balance - 5_000_000_000);
    assert_eq!(staked.staked_pseudotokens, 5_000_000_000);
    assert_eq!(pool.external_staked_balance, baker.external_staked_balance + 5_000_000_000);
    assert_eq!(pool.issued_pseudotokens, 5_000_000_000);
    assert_eq!(pool.stakers_count, 1);
    // Staked funds stay delegated weight-wise only through the pool.
    assert_eq!(
        pool.external_delegated_balance,
        baker.external_delegated_balance - 5_000_000_000
    );

    chain
        .bake(BlockSpec::new().op(ops::unstake(USERS[0], 5_000_000_000, 0)))
        .await
        .unwrap();
    let user_after = chain.account(USERS[0]).await.unwrap().unwrap();
    let pool_after = chain.account(BAKERS[0]).await.unwrap().unwrap();
    assert_eq!(user_after.balance, user.balance);
    assert_eq!(user_after.staked_pseudotokens, 0);
    assert_eq!(pool_after.external_staked_balance, baker.external_staked_balance);
    assert_eq!(pool_after.issued_pseudotokens, 0);
    assert_eq!(pool_after.stakers_count, 0);
}

#[tokio::test]
async fn baker_self_stake_moves_liquid_to_frozen() {
    let mut chain = staking_chain().await;
    let stake = 1_000_000_000;

    chain
        .bake(BlockSpec::new().op(ops::stake(BAKERS[2], stake, 0)))
        .await
        .unwrap();
    let with_stake = chain.account(BAKERS[2]).await.unwrap().unwrap();

    // Same level without the operation: rewards are identical.
    chain.rewind(3, "control").await.unwrap();
    chain.bake_empty().await.unwrap();
    let without = chain.account(BAKERS[2]).await.unwrap().unwrap();

    assert_eq!(with_stake.own_staked_balance - without.own_staked_balance, stake);
    assert_eq!(with_stake.balance, without.balance);
    assert_eq!(with_stake.liquid_balance(), without.liquid_balance() - stake);
}

#[tokio::test]
async fn staking_needs_a_delegate_and_funds() {
    let mut chain = staking_chain().await;
    let err = chain
        .bake(BlockSpec::new().op(ops::stake(USERS[2], 1_000, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::Validation { .. }));

    let err = chain
        .bake(BlockSpec::new().op(ops::stake(USERS[1], 100_000_000_000, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::Validation { .. }));
    assert_eq!(chain.level(), 3);
}
