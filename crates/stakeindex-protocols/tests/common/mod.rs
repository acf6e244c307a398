//! Shared scenario for the engine's integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use stakeindex_core::config::V2_PROTOCOL;
use stakeindex_protocols::{Engine, EngineOptions};
use stakeindex_storage::MemoryStore;
use stakeindex_testkit::fixtures::{self, ops, BAKERS, USERS};
use stakeindex_testkit::{BlockSpec, ChainBuilder, MockNode};

pub const FRESH: &str = "tz1freshHHHHHHHHHHHHHHHHHHHHHHHHHHH";
pub const CONTRACT: &str = "KT1contractIIIIIIIIIIIIIIIIIIIIIIII";
pub const ACTIVATED: &str = "tz1activatedJJJJJJJJJJJJJJJJJJJJJJJ";

/// Level at which the chain switches to the staking protocol.
pub const V2_LEVEL: i64 = 14;

/// Constants of the staking protocol: rights one cycle further ahead.
pub fn v2_constants() -> stakeindex_core::raw::RawConstants {
    let mut c = fixtures::constants();
    c.consensus_rights_delay = 3;
    c
}

/// A few cycles of history touching every handler: transfers with
/// allocation, delegation, governance, activation, evidence, a late round,
/// an absent attester, a protocol upgrade and staking.
pub async fn scripted_chain() -> ChainBuilder {
    let mut chain = ChainBuilder::new().await.unwrap();
    chain.bake_empty().await.unwrap();
    chain
        .bake(
            BlockSpec::new()
                .op(ops::transaction(USERS[0], FRESH, 1_000_000_000, 1_000))
                .op(ops::reveal(USERS[1], 500)),
        )
        .await
        .unwrap();
    chain
        .bake(
            BlockSpec::new()
                .op(ops::delegation(USERS[2], Some(BAKERS[2]), 300))
                .op(ops::proposals(BAKERS[0], 0, &["PtNext"])),
        )
        .await
        .unwrap();
    chain
        .bake(
            BlockSpec::new()
                .op(ops::activate_account(ACTIVATED, 2_000_000_000))
                .op(ops::nonce_revelation(3)),
        )
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::transaction_with_internal(
            USERS[1],
            CONTRACT,
            500_000_000,
            200,
            &[(FRESH, 100_000_000), (USERS[2], 200_000_000)],
        )))
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::failed(ops::transaction(USERS[0], USERS[1], 7, 50))))
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::double_baking(BAKERS[1], 6)))
        .await
        .unwrap();
    chain.bake(BlockSpec::new().round(1).absent(BAKERS[3])).await.unwrap();

    chain.bake_until(V2_LEVEL - 2).await.unwrap();
    chain.announce(V2_PROTOCOL, v2_constants());
    chain.bake_until(V2_LEVEL).await.unwrap();

    chain
        .bake(BlockSpec::new().op(ops::stake(USERS[0], 5_000_000_000, 100)))
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::stake(BAKERS[3], 1_000_000_000, 100)))
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::double_attestation(BAKERS[0], V2_LEVEL + 1)))
        .await
        .unwrap();
    chain
        .bake(BlockSpec::new().op(ops::unstake(USERS[0], 1_000_000_000, 100)))
        .await
        .unwrap();
    chain.bake_until(36).await.unwrap();
    chain
}

/// A fresh engine over an empty store, reading from `node`.
pub async fn replica(chain: &ChainBuilder, options: EngineOptions) -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), chain.node(), chain.registry(), options)
        .await
        .unwrap();
    (store, engine)
}

/// Commit the node's blocks until the engine reaches `level`.
pub async fn sync_to(engine: &mut Engine, node: &MockNode, level: i64) {
    while engine.state().level < level {
        let block = node.block_at(engine.state().level + 1).unwrap();
        engine.commit(&block).await.unwrap();
    }
}
