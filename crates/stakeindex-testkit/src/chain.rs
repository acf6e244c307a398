//! Produces chains the engine accepts.
//!
//! [`ChainBuilder`] runs an oracle [`Engine`] over its own memory store:
//! every block it bakes is first committed there, so proposers and
//! attesters always come from the rights the indexer itself computes, and
//! the oracle's conservation check guards every scenario. Committed blocks
//! are then published on the [`MockNode`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use stakeindex_core::config::{Settings, BOOTSTRAP_PROTOCOL, GENESIS_PROTOCOL, V1_PROTOCOL};
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Account, AppState, RightKind};
use stakeindex_core::raw::{RawBlock, RawBootstrapAccount, RawConstants, RawOperation, RawParameters};
use stakeindex_core::store::IndexStore;
use stakeindex_protocols::rights::RightsSampler;
use stakeindex_protocols::{Engine, EngineOptions, ProtocolRegistry};
use stakeindex_storage::MemoryStore;

use crate::fixtures::{self, ops};
use crate::node::MockNode;

const BLOCK_TIME_SECS: i64 = 8;

/// What goes into the next block.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub round: i32,
    pub operations: Vec<RawOperation>,
    /// Include attestations for every right of the previous level.
    pub attest: bool,
    /// Bakers whose attestation is left out.
    pub absent: Vec<String>,
}

impl Default for BlockSpec {
    fn default() -> Self {
        Self {
            round: 0,
            operations: Vec::new(),
            attest: true,
            absent: Vec::new(),
        }
    }
}

impl BlockSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round(mut self, round: i32) -> Self {
        self.round = round;
        self
    }

    pub fn op(mut self, op: RawOperation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn ops(mut self, ops: impl IntoIterator<Item = RawOperation>) -> Self {
        self.operations.extend(ops);
        self
    }

    pub fn without_attestations(mut self) -> Self {
        self.attest = false;
        self
    }

    pub fn absent(mut self, baker: &str) -> Self {
        self.absent.push(baker.to_string());
        self
    }
}

pub struct ChainBuilder {
    node: Arc<MockNode>,
    store: Arc<MemoryStore>,
    registry: Arc<ProtocolRegistry>,
    oracle: Engine,
    salt: String,
    announced: Option<String>,
    genesis_time: DateTime<Utc>,
}

impl ChainBuilder {
    /// Genesis and bootstrap blocks with the default fixtures.
    pub async fn new() -> Result<Self, IndexerError> {
        Self::with(fixtures::constants(), fixtures::bootstrap_accounts()).await
    }

    pub async fn with(constants: RawConstants, accounts: Vec<RawBootstrapAccount>) -> Result<Self, IndexerError> {
        let node = Arc::new(MockNode::new());
        node.set_constants(1, constants);
        let registry = Arc::new(ProtocolRegistry::from_entries(&Settings::default().protocols, None)?);
        let store = Arc::new(MemoryStore::new());
        let options = EngineOptions {
            diagnostics: true,
            diagnostics_fatal: true,
            ..EngineOptions::default()
        };
        let oracle = Engine::open(store.clone(), node.clone(), registry.clone(), options).await?;
        let mut builder = Self {
            node,
            store,
            registry,
            oracle,
            salt: "main".into(),
            announced: None,
            genesis_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        };

        let genesis = builder.block(0, GENESIS_PROTOCOL, BOOTSTRAP_PROTOCOL, String::new(), 0, Vec::new());
        builder.publish(genesis).await?;
        let mut bootstrap = builder.block(
            1,
            BOOTSTRAP_PROTOCOL,
            V1_PROTOCOL,
            fixtures::BAKERS[0].to_string(),
            0,
            Vec::new(),
        );
        bootstrap.parameters = Some(RawParameters {
            bootstrap_accounts: accounts,
        });
        builder.publish(bootstrap).await?;
        Ok(builder)
    }

    pub fn node(&self) -> Arc<MockNode> {
        self.node.clone()
    }

    /// The oracle's store.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ProtocolRegistry> {
        self.registry.clone()
    }

    pub fn state(&self) -> &AppState {
        self.oracle.state()
    }

    pub fn level(&self) -> i64 {
        self.oracle.state().level
    }

    pub async fn account(&self, address: &str) -> Result<Option<Account>, IndexerError> {
        self.store.account_by_address(address).await
    }

    /// Bake the next block.
    pub async fn bake(&mut self, spec: BlockSpec) -> Result<RawBlock, IndexerError> {
        let state = self.oracle.state().clone();
        let level = state.level + 1;
        let protocol = state.next_protocol.clone();
        let next_protocol = self.announced.take().unwrap_or_else(|| protocol.clone());
        let proposer = self.proposer(&state, level, spec.round).await?;

        let mut operations = Vec::new();
        if spec.attest {
            for right in self.store.rights_at(level - 1).await? {
                if right.kind != RightKind::Attestation {
                    continue;
                }
                let address = self.address(right.baker_id).await?;
                if !spec.absent.contains(&address) {
                    operations.push(ops::attestation(&address, right.slots.unwrap_or(0)));
                }
            }
        }
        operations.extend(spec.operations);

        let block = self.block(level, &protocol, &next_protocol, proposer, spec.round, operations);
        self.publish(block).await
    }

    pub async fn bake_empty(&mut self) -> Result<RawBlock, IndexerError> {
        self.bake(BlockSpec::default()).await
    }

    pub async fn bake_many(&mut self, count: usize) -> Result<(), IndexerError> {
        for _ in 0..count {
            self.bake_empty().await?;
        }
        Ok(())
    }

    /// Bake empty blocks until the head is at `level`.
    pub async fn bake_until(&mut self, level: i64) -> Result<(), IndexerError> {
        while self.level() < level {
            self.bake_empty().await?;
        }
        Ok(())
    }

    /// Announce `protocol` in the next block; it runs from the block after,
    /// with `constants`.
    pub fn announce(&mut self, protocol: &str, constants: RawConstants) {
        self.announced = Some(protocol.to_string());
        self.node.set_constants(self.level() + 2, constants);
    }

    /// Revert the oracle and the node to `level`. Blocks baked afterwards
    /// get different hashes.
    pub async fn rewind(&mut self, level: i64, salt: &str) -> Result<(), IndexerError> {
        while self.level() > level {
            self.oracle.revert().await?;
        }
        self.node.truncate(level);
        self.salt = salt.to_string();
        self.announced = None;
        Ok(())
    }

    async fn address(&self, id: i64) -> Result<String, IndexerError> {
        self.store
            .account(id)
            .await?
            .map(|a| a.address)
            .ok_or_else(|| IndexerError::missing("account", id))
    }

    /// Holder of the baking right for `level` at `round`.
    async fn proposer(&self, state: &AppState, level: i64, round: i32) -> Result<String, IndexerError> {
        let baker = if round == 0 {
            self.store
                .rights_at(level)
                .await?
                .into_iter()
                .find(|r| r.kind == RightKind::Baking && r.round == Some(0))
                .map(|r| r.baker_id)
        } else {
            let protocol = self
                .store
                .protocol(&state.protocol)
                .await?
                .ok_or_else(|| IndexerError::missing("protocol", &state.protocol))?;
            let index = protocol.cycle_of(level);
            let cycle = self
                .store
                .cycle(index)
                .await?
                .ok_or_else(|| IndexerError::missing("cycle", index))?;
            let snapshots = self.store.snapshot_balances(index).await?;
            RightsSampler::new(&cycle, &snapshots)?.baker(level, round)
        };
        let baker = baker.ok_or_else(|| IndexerError::missing("baking right", format!("{level}/{round}")))?;
        self.address(baker).await
    }

    fn block(
        &self,
        level: i64,
        protocol: &str,
        next_protocol: &str,
        proposer: String,
        round: i32,
        mut operations: Vec<RawOperation>,
    ) -> RawBlock {
        let predecessor = if level == 0 {
            String::new()
        } else {
            self.oracle.state().hash.clone()
        };
        for (i, op) in operations.iter_mut().enumerate() {
            if op.hash.is_empty() {
                op.hash = format!("o{level}x{i}{}", self.salt);
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(level.to_be_bytes());
        hasher.update(predecessor.as_bytes());
        let hash = format!("B{}", &hex::encode(hasher.finalize())[..24]);
        RawBlock {
            level,
            hash,
            predecessor,
            timestamp: self.genesis_time + Duration::seconds(level * BLOCK_TIME_SECS),
            protocol: protocol.to_string(),
            next_protocol: next_protocol.to_string(),
            payload_round: round,
            proposer,
            operations,
            parameters: None,
        }
    }

    async fn publish(&mut self, block: RawBlock) -> Result<RawBlock, IndexerError> {
        self.oracle.commit(&block).await?;
        self.node.push_block(block.clone());
        Ok(block)
    }
}
