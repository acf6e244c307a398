//! The observer against a scripted node: catching up, forks, failures and
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use stakeindex_core::config::{HeadMode, Settings, V1_PROTOCOL};
use stakeindex_core::error::IndexerError;
use stakeindex_core::store::IndexStore;
use stakeindex_protocols::{Engine, EngineOptions, ProtocolRegistry};
use stakeindex_storage::MemoryStore;
use stakeindex_sync::{ObserverBuilder, ObserverHandle, ObserverState};
use stakeindex_testkit::fixtures::{ops, USERS};
use stakeindex_testkit::{BlockSpec, ChainBuilder};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn observe(
    chain: &ChainBuilder,
    registry: Arc<ProtocolRegistry>,
    mode: HeadMode,
) -> (Arc<MemoryStore>, ObserverHandle) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), chain.node(), registry, EngineOptions::default())
        .await
        .unwrap();
    let handle = ObserverBuilder::new(engine, chain.node())
        .head_mode(mode)
        .poll_interval(Duration::from_millis(5))
        .retry_backoff(Duration::from_millis(5))
        .sync_status_interval(Duration::from_millis(5))
        .spawn();
    (store, handle)
}

/// Wait until the local head is the node's head.
async fn converged(store: &MemoryStore, chain: &ChainBuilder) {
    let node = chain.node();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let head = node.block_at(node.head_level()).unwrap();
            if let Some(state) = store.app_state().await.unwrap() {
                if state.level == head.level && state.hash == head.hash {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("observer did not converge");
}

async fn assert_same_branch(store: &MemoryStore, chain: &ChainBuilder) {
    let node = chain.node();
    for level in 0..=node.head_level() {
        let local = store.block(level).await.unwrap().unwrap();
        assert_eq!(local.hash, node.block_at(level).unwrap().hash, "level {level}");
    }
    assert!(store.dump() == chain.store().dump(), "{:?}", store.dump().diff(&chain.store().dump()));
}

#[tokio::test]
async fn catches_up_and_follows() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(10).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;

    chain.bake_many(5).await.unwrap();
    converged(&store, &chain).await;
    assert_same_branch(&store, &chain).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn streaming_heads_coalesce() {
    let mut chain = ChainBuilder::new().await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Streaming).await;
    converged(&store, &chain).await;

    // A burst of heads while the worker is busy.
    chain.bake_many(20).await.unwrap();
    converged(&store, &chain).await;
    assert_same_branch(&store, &chain).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn fork_is_reverted_then_reapplied() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(20).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;
    let old_16 = store.block(16).await.unwrap().unwrap().hash;

    chain.rewind(15, "fork").await.unwrap();
    chain
        .bake(BlockSpec::new().op(ops::transaction(USERS[0], USERS[1], 1_000, 10)))
        .await
        .unwrap();
    chain.bake_many(7).await.unwrap();
    converged(&store, &chain).await;

    assert_ne!(store.block(16).await.unwrap().unwrap().hash, old_16);
    assert_same_branch(&store, &chain).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shorter_remote_branch_is_followed_down() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(12).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;

    chain.rewind(9, "short").await.unwrap();
    converged(&store, &chain).await;
    assert_eq!(store.app_state().await.unwrap().unwrap().level, 9);
    assert_same_branch(&store, &chain).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(5).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;

    chain.bake_many(5).await.unwrap();
    store.fail_next_commits(2);
    chain.node().fail_next(4);
    converged(&store, &chain).await;
    assert_same_branch(&store, &chain).await;
    assert_ne!(handle.state(), ObserverState::Failed);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_protocol_stops_the_observer() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(3).await.unwrap();
    let entries: Vec<_> = Settings::default()
        .protocols
        .into_iter()
        .filter(|e| e.hash != V1_PROTOCOL)
        .collect();
    let registry = Arc::new(ProtocolRegistry::from_entries(&entries, None).unwrap());
    let (store, handle) = observe(&chain, registry, HeadMode::Polling).await;

    let err = tokio::time::timeout(TIMEOUT, handle.join()).await.unwrap().unwrap_err();
    assert!(matches!(err, IndexerError::UnsupportedProtocol(ref p) if p == V1_PROTOCOL));
    // Genesis and bootstrap were applied before the failure.
    assert_eq!(store.app_state().await.unwrap().unwrap().level, 1);
}

#[tokio::test]
async fn shutdown_stops_every_task_and_saves_status() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(4).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;
    tokio::time::timeout(TIMEOUT, async {
        while store.sync_status().await.unwrap().last_sync.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let mut states = handle.watch_state();
    handle.shutdown().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ObserverState::Stopped);

    let status = store.sync_status().await.unwrap();
    assert_eq!(status.known_head, chain.level());
    assert_eq!(status.known_hash, chain.state().hash);
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn lagging_observer_stays_behind() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(10).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), chain.node(), chain.registry(), EngineOptions::default())
        .await
        .unwrap();
    let handle = ObserverBuilder::new(engine, chain.node())
        .poll_interval(Duration::from_millis(5))
        .lag(3)
        .spawn();

    tokio::time::timeout(TIMEOUT, async {
        while store.app_state().await.unwrap().map(|s| s.level) != Some(chain.level() - 3) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.app_state().await.unwrap().unwrap().level, chain.level() - 3);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_with_larger_lag_waits_instead_of_rebasing() {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_many(12).await.unwrap();
    let (store, handle) = observe(&chain, chain.registry(), HeadMode::Polling).await;
    converged(&store, &chain).await;
    handle.shutdown().await.unwrap();
    let synced = chain.level();

    // Reopen on the same store, now three levels behind the node.
    let engine = Engine::open(store.clone(), chain.node(), chain.registry(), EngineOptions::default())
        .await
        .unwrap();
    let handle = ObserverBuilder::new(engine, chain.node())
        .poll_interval(Duration::from_millis(5))
        .retry_backoff(Duration::from_millis(5))
        .lag(3)
        .spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let node = chain.node();
    let before = node.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = node.calls() - before;
    assert!(calls < 500, "{calls} node calls while idle");
    assert_eq!(handle.state(), ObserverState::Idle);
    assert_eq!(store.app_state().await.unwrap().unwrap().level, synced);
    assert_eq!(store.block(synced).await.unwrap().unwrap().hash, chain.state().hash);

    // Once the lagged head passes the local one, it advances again.
    chain.bake_many(6).await.unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while store.app_state().await.unwrap().map(|s| s.level) != Some(chain.level() - 3) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    handle.shutdown().await.unwrap();
}
