//! In-process [`NodeClient`] serving a scripted chain.
//!
//! The chain is a vector of blocks indexed by level. Tests grow it with
//! [`MockNode::push_block`], cut it with [`MockNode::truncate`] to simulate
//! a reorganization, and inject transient failures with
//! [`MockNode::fail_next`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use sha2::{Digest, Sha256};

use stakeindex_core::error::IndexerError;
use stakeindex_core::raw::{RawBlock, RawConstants, RawHeader, RawRight};
use stakeindex_node::{HeadStream, NodeClient, RightsScope};

#[derive(Default)]
struct Chain {
    blocks: Vec<RawBlock>,
    /// `(first level, constants)`, ascending.
    constants: Vec<(i64, RawConstants)>,
    balances: HashMap<(i64, String), i64>,
    baking_rights: HashMap<i64, Vec<RawRight>>,
    failures: u32,
    subscribers: Vec<mpsc::UnboundedSender<Result<RawHeader, IndexerError>>>,
    calls: u64,
}

#[derive(Default)]
pub struct MockNode {
    chain: Mutex<Chain>,
}

/// Deterministic seed the mock serves for `cycle`.
pub fn mock_seed(cycle: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"mock-seed");
    hasher.update(cycle.to_be_bytes());
    hex::encode(hasher.finalize())
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `constants` from `first_level` onward.
    pub fn set_constants(&self, first_level: i64, constants: RawConstants) {
        let mut chain = self.chain.lock().unwrap();
        chain.constants.retain(|(l, _)| *l < first_level);
        chain.constants.push((first_level, constants));
    }

    /// Append a block and announce it to head subscribers.
    pub fn push_block(&self, block: RawBlock) {
        let mut chain = self.chain.lock().unwrap();
        assert_eq!(block.level, chain.blocks.len() as i64, "blocks must be pushed in level order");
        let header = block.header();
        chain.blocks.push(block);
        chain
            .subscribers
            .retain(|tx| tx.unbounded_send(Ok(header.clone())).is_ok());
    }

    /// Drop every block above `level`.
    pub fn truncate(&self, level: i64) {
        let mut chain = self.chain.lock().unwrap();
        let keep = (level + 1).max(0) as usize;
        chain.blocks.truncate(keep);
        chain.balances.retain(|(l, _), _| *l <= level);
        chain.baking_rights.retain(|l, _| *l <= level);
    }

    pub fn head_level(&self) -> i64 {
        self.chain.lock().unwrap().blocks.len() as i64 - 1
    }

    pub fn block_at(&self, level: i64) -> Option<RawBlock> {
        let chain = self.chain.lock().unwrap();
        usize::try_from(level).ok().and_then(|l| chain.blocks.get(l).cloned())
    }

    /// Fail the next `n` requests with an RPC error.
    pub fn fail_next(&self, n: u32) {
        self.chain.lock().unwrap().failures = n;
    }

    /// Report `balance` for `address` at `level`.
    pub fn set_balance(&self, level: i64, address: &str, balance: i64) {
        self.chain
            .lock()
            .unwrap()
            .balances
            .insert((level, address.to_string()), balance);
    }

    /// Serve baking rights for `level`.
    pub fn set_baking_rights(&self, level: i64, rights: Vec<RawRight>) {
        self.chain.lock().unwrap().baking_rights.insert(level, rights);
    }

    /// Requests served so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.chain.lock().unwrap().calls
    }

    fn request(&self) -> Result<std::sync::MutexGuard<'_, Chain>, IndexerError> {
        let mut chain = self.chain.lock().unwrap();
        chain.calls += 1;
        if chain.failures > 0 {
            chain.failures -= 1;
            return Err(IndexerError::Rpc("injected failure".into()));
        }
        Ok(chain)
    }
}

fn block_at(chain: &Chain, level: i64) -> Option<&RawBlock> {
    usize::try_from(level).ok().and_then(|l| chain.blocks.get(l))
}

#[async_trait]
impl NodeClient for MockNode {
    async fn head(&self) -> Result<RawHeader, IndexerError> {
        let chain = self.request()?;
        chain
            .blocks
            .last()
            .map(RawBlock::header)
            .ok_or_else(|| IndexerError::Rpc("node has no blocks".into()))
    }

    async fn header(&self, level: i64) -> Result<Option<RawHeader>, IndexerError> {
        let chain = self.request()?;
        Ok(block_at(&chain, level).map(RawBlock::header))
    }

    async fn block(&self, level: i64) -> Result<Option<RawBlock>, IndexerError> {
        let chain = self.request()?;
        Ok(block_at(&chain, level).cloned())
    }

    async fn constants(&self, level: i64) -> Result<RawConstants, IndexerError> {
        let chain = self.request()?;
        chain
            .constants
            .iter()
            .rev()
            .find(|(first, _)| *first <= level)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| IndexerError::Rpc(format!("no constants at level {level}")))
    }

    async fn cycle_seed(&self, _level: i64, cycle: i64) -> Result<String, IndexerError> {
        let _chain = self.request()?;
        Ok(mock_seed(cycle))
    }

    async fn baking_rights(&self, _level: i64, scope: RightsScope) -> Result<Option<Vec<RawRight>>, IndexerError> {
        let chain = self.request()?;
        Ok(match scope {
            RightsScope::Level(level) => chain.baking_rights.get(&level).cloned(),
            RightsScope::Cycle(_) => None,
        })
    }

    async fn attestation_rights(
        &self,
        _level: i64,
        _scope: RightsScope,
    ) -> Result<Option<Vec<RawRight>>, IndexerError> {
        let _chain = self.request()?;
        Ok(None)
    }

    async fn balance(&self, level: i64, address: &str) -> Result<Option<i64>, IndexerError> {
        let chain = self.request()?;
        Ok(chain.balances.get(&(level, address.to_string())).copied())
    }

    async fn monitor_heads(&self) -> Result<HeadStream, IndexerError> {
        let mut chain = self.request()?;
        let (tx, rx) = mpsc::unbounded();
        chain.subscribers.push(tx);
        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn block(level: i64) -> RawBlock {
        RawBlock {
            level,
            hash: format!("B{level}"),
            predecessor: format!("B{}", level - 1),
            timestamp: DateTime::from_timestamp(level * 8, 0).unwrap(),
            protocol: "PtA".into(),
            next_protocol: "PtA".into(),
            payload_round: 0,
            proposer: String::new(),
            operations: Vec::new(),
            parameters: None,
        }
    }

    #[tokio::test]
    async fn serves_and_truncates_chain() {
        let node = MockNode::new();
        for level in 0..5 {
            node.push_block(block(level));
        }
        assert_eq!(node.head().await.unwrap().level, 4);
        assert_eq!(node.header(2).await.unwrap().unwrap().hash, "B2");
        assert!(node.block(9).await.unwrap().is_none());

        node.truncate(2);
        assert_eq!(node.head_level(), 2);
        assert!(node.header(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let node = MockNode::new();
        node.push_block(block(0));
        node.fail_next(2);
        assert!(node.head().await.unwrap_err().is_transient());
        assert!(node.head().await.is_err());
        assert!(node.head().await.is_ok());
        assert_eq!(node.calls(), 3);
    }

    #[tokio::test]
    async fn seed_and_rights_count_as_requests() {
        let node = MockNode::new();
        node.fail_next(1);
        assert!(node.cycle_seed(0, 3).await.unwrap_err().is_transient());
        assert_eq!(node.cycle_seed(0, 3).await.unwrap(), mock_seed(3));
        assert!(node.attestation_rights(0, RightsScope::Cycle(3)).await.unwrap().is_none());
        // The lock is released after each call.
        assert!(node.head().await.is_err());
        assert_eq!(node.calls(), 4);
    }

    #[tokio::test]
    async fn constants_follow_levels() {
        let node = MockNode::new();
        let mut c = crate::fixtures::constants();
        node.set_constants(1, c.clone());
        c.consensus_rights_delay = 3;
        node.set_constants(10, c);
        assert_eq!(node.constants(9).await.unwrap().consensus_rights_delay, 2);
        assert_eq!(node.constants(10).await.unwrap().consensus_rights_delay, 3);
        assert!(node.constants(0).await.is_err());
    }

    #[tokio::test]
    async fn head_stream_announces_pushed_blocks() {
        let node = MockNode::new();
        let mut heads = node.monitor_heads().await.unwrap();
        node.push_block(block(0));
        node.push_block(block(1));
        assert_eq!(heads.next().await.unwrap().unwrap().level, 0);
        assert_eq!(heads.next().await.unwrap().unwrap().level, 1);
        assert_eq!(mock_seed(3), mock_seed(3));
        assert_ne!(mock_seed(3), mock_seed(4));
    }
}
