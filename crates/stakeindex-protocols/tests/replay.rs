//! Commit/revert round trips over a scripted chain.

mod common;

use stakeindex_core::store::IndexStore;
use stakeindex_protocols::{Engine, EngineOptions};

use common::{replica, scripted_chain, sync_to};

#[tokio::test]
async fn replica_matches_oracle() {
    let chain = scripted_chain().await;
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &chain.node(), chain.level()).await;

    let expected = chain.store().dump();
    let actual = store.dump();
    assert!(actual == expected, "tables differ: {:?}", actual.diff(&expected));
}

#[tokio::test]
async fn revert_restores_every_level() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;

    let mut dumps = Vec::new();
    for level in 0..=node.head_level() {
        engine.commit(&node.block_at(level).unwrap()).await.unwrap();
        dumps.push(store.dump());
    }

    for level in (1..=node.head_level()).rev() {
        engine.revert().await.unwrap();
        let expected = &dumps[(level - 1) as usize];
        let actual = store.dump();
        assert!(
            actual == *expected,
            "revert of level {level} left {:?} different",
            actual.diff(expected)
        );
    }
    assert_eq!(engine.state().level, 0);
}

#[tokio::test]
async fn reapplying_reverted_levels_is_idempotent() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &node, node.head_level()).await;
    let before = store.dump();

    // Back across the upgrade and the staking operations.
    for _ in 0..25 {
        engine.revert().await.unwrap();
    }
    sync_to(&mut engine, &node, node.head_level()).await;
    assert!(store.dump() == before, "{:?}", store.dump().diff(&before));
}

#[tokio::test]
async fn reopened_engine_continues_from_checkpoint() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &node, 20).await;
    drop(engine);

    let mut engine = Engine::open(store.clone(), node.clone(), chain.registry(), EngineOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.state().level, 20);
    sync_to(&mut engine, &node, node.head_level()).await;
    assert!(store.dump() == chain.store().dump());
}

#[tokio::test]
async fn failed_flush_leaves_store_untouched() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &node, 9).await;
    let before = store.dump();

    store.fail_next_commits(1);
    let err = engine.commit(&node.block_at(10).unwrap()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(engine.state().level, 9);
    assert!(store.dump() == before);

    store.fail_next_commits(1);
    assert!(engine.revert().await.unwrap_err().is_transient());
    assert_eq!(engine.state().level, 9);

    sync_to(&mut engine, &node, node.head_level()).await;
    assert!(store.dump() == chain.store().dump());
}

#[tokio::test]
async fn node_failure_during_prefetch_is_retryable() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, EngineOptions::default()).await;
    // Level 17 starts a cycle and needs a seed from the node.
    sync_to(&mut engine, &node, 16).await;
    let before = store.dump();

    node.fail_next(1);
    let err = engine.commit(&node.block_at(17).unwrap()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(store.dump() == before);
    sync_to(&mut engine, &node, 17).await;
    assert!(store.cycle(5).await.unwrap().is_some());
}
