//! Checks applied to incoming blocks.

mod common;

use stakeindex_core::error::IndexerError;
use stakeindex_protocols::EngineOptions;
use stakeindex_testkit::fixtures::USERS;

use common::{replica, scripted_chain, sync_to};

fn strict() -> EngineOptions {
    EngineOptions {
        strict_validation: true,
        diagnostics: true,
        diagnostics_fatal: true,
        ..EngineOptions::default()
    }
}

#[tokio::test]
async fn strict_engine_accepts_consistent_chain() {
    let chain = scripted_chain().await;
    let (store, mut engine) = replica(&chain, strict()).await;
    sync_to(&mut engine, &chain.node(), chain.level()).await;
    assert!(store.dump() == chain.store().dump());
}

#[tokio::test]
async fn structural_mismatches_require_rebase() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (_, mut engine) = replica(&chain, EngineOptions::default()).await;
    sync_to(&mut engine, &node, 10).await;

    let mut forked = node.block_at(11).unwrap();
    forked.predecessor = "Bsomewhere-else".into();
    assert!(engine.commit(&forked).await.unwrap_err().requires_rebase());

    let skipped = node.block_at(12).unwrap();
    assert!(engine.commit(&skipped).await.unwrap_err().requires_rebase());

    let mut switched = node.block_at(11).unwrap();
    switched.protocol = "PtUnexpected".into();
    assert!(engine.commit(&switched).await.unwrap_err().requires_rebase());

    assert_eq!(engine.state().level, 10);
    engine.commit(&node.block_at(11).unwrap()).await.unwrap();
}

#[tokio::test]
async fn unknown_proposer_is_rejected_when_strict() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (_, mut engine) = replica(&chain, strict()).await;
    sync_to(&mut engine, &node, 20).await;

    let mut tampered = node.block_at(21).unwrap();
    tampered.proposer = USERS[0].into();
    let err = engine.commit(&tampered).await.unwrap_err();
    assert!(matches!(err, IndexerError::Validation { rebase_required: false, .. }));
    assert_eq!(engine.state().level, 20);
}

#[tokio::test]
async fn diagnostics_catch_node_disagreement() {
    let chain = scripted_chain().await;
    let node = chain.node();
    let (store, mut engine) = replica(&chain, strict()).await;
    sync_to(&mut engine, &node, 20).await;
    let before = store.dump();

    let block = node.block_at(21).unwrap();
    node.set_balance(21, &block.proposer, 1);
    let err = engine.commit(&block).await.unwrap_err();
    assert!(matches!(err, IndexerError::Diagnostics { level: 21, .. }));
    assert!(err.requires_rebase());
    // The level was undone.
    assert_eq!(engine.state().level, 20);
    assert!(store.dump() == before);
}
