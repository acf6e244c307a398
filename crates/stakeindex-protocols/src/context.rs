//! Working set of one commit or revert.
//!
//! A [`LevelContext`] carries a copy of the application state, the block
//! being applied (or the stored row of the block being reverted) and every
//! input fetched from the node. Stages read and write entities through the
//! entity cache; nothing reaches the store until the engine flushes.

use std::collections::HashMap;
use std::sync::Arc;

use stakeindex_core::cache::EntityCache;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{
    Account, AppState, BakerCycle, Block, BlockEvents, Operation, Protocol, ProtocolConstants, Statistics,
};
use stakeindex_core::raw::{RawBlock, RawConstants};
use stakeindex_core::store::IndexStore;
use stakeindex_node::NodeClient;

use crate::handler::ProtocolHandler;
use crate::rounding::RoundingTable;

pub struct LevelContext<'a> {
    pub store: &'a dyn IndexStore,
    pub node: &'a dyn NodeClient,
    pub cache: &'a mut EntityCache,
    pub handler: Arc<ProtocolHandler>,
    /// Working copy; becomes the checkpoint once the level is flushed.
    pub state: AppState,
    pub level: i64,
    raw: Option<&'a RawBlock>,
    /// Block row of this level, once the block stage has built it (commit)
    /// or as stored (revert).
    pub block: Option<Block>,
    /// Protocol the block runs under; `None` until activation creates it.
    pub protocol: Option<Protocol>,
    /// The block is the first one of its protocol.
    pub activating: bool,
    /// Operations of this level in application order.
    pub operations: Vec<Operation>,
    /// Node constants, fetched before any mutation when activating.
    pub constants: Option<RawConstants>,
    /// Cycle seeds fetched before any mutation.
    pub seeds: HashMap<i64, String>,
    /// Accounts allocated so far at this level.
    pub new_accounts: i64,
}

impl<'a> LevelContext<'a> {
    pub fn for_commit(
        store: &'a dyn IndexStore,
        node: &'a dyn NodeClient,
        cache: &'a mut EntityCache,
        handler: Arc<ProtocolHandler>,
        state: AppState,
        raw: &'a RawBlock,
    ) -> Self {
        let activating = state.protocol_switch_pending();
        Self {
            store,
            node,
            cache,
            handler,
            state,
            level: raw.level,
            raw: Some(raw),
            block: None,
            protocol: None,
            activating,
            operations: Vec::new(),
            constants: None,
            seeds: HashMap::new(),
            new_accounts: 0,
        }
    }

    pub fn for_revert(
        store: &'a dyn IndexStore,
        node: &'a dyn NodeClient,
        cache: &'a mut EntityCache,
        handler: Arc<ProtocolHandler>,
        state: AppState,
        block: Block,
    ) -> Self {
        let activating = block.events.contains(BlockEvents::PROTOCOL_BEGIN);
        Self {
            store,
            node,
            cache,
            handler,
            state,
            level: block.level,
            raw: None,
            block: Some(block),
            protocol: None,
            activating,
            operations: Vec::new(),
            constants: None,
            seeds: HashMap::new(),
            new_accounts: 0,
        }
    }

    pub fn is_revert(&self) -> bool {
        self.raw.is_none()
    }

    /// The block being applied.
    pub fn raw(&self) -> Result<&'a RawBlock, IndexerError> {
        self.raw
            .ok_or_else(|| IndexerError::Other(format!("no raw block while reverting level {}", self.level)))
    }

    pub fn rules(&self) -> RoundingTable {
        self.handler.rules
    }

    pub fn protocol(&self) -> Result<&Protocol, IndexerError> {
        self.protocol
            .as_ref()
            .ok_or_else(|| IndexerError::missing("protocol", format!("at level {}", self.level)))
    }

    pub fn constants(&self) -> Result<&ProtocolConstants, IndexerError> {
        Ok(&self.protocol()?.constants)
    }

    pub fn cycle(&self) -> Result<i64, IndexerError> {
        Ok(self.protocol()?.cycle_of(self.level))
    }

    // ─── Block ───────────────────────────────────────────────────────────────

    pub fn block(&self) -> Result<&Block, IndexerError> {
        self.block.as_ref().ok_or_else(|| IndexerError::missing("block", self.level))
    }

    /// Modify the block row of this level.
    pub fn update_block(&mut self, f: impl FnOnce(&mut Block)) -> Result<(), IndexerError> {
        let reverting = self.is_revert();
        let block = self
            .block
            .as_mut()
            .ok_or_else(|| IndexerError::missing("block", self.level))?;
        f(block);
        if !reverting {
            self.cache.put_block(block.clone());
        }
        Ok(())
    }

    pub fn proposer_id(&self) -> Result<i64, IndexerError> {
        self.block()?
            .proposer_id
            .ok_or_else(|| IndexerError::missing("proposer", format!("of block {}", self.level)))
    }

    // ─── Accounts ────────────────────────────────────────────────────────────

    pub async fn account(&mut self, id: i64) -> Result<Account, IndexerError> {
        self.cache
            .account(self.store, id)
            .await?
            .ok_or_else(|| IndexerError::missing("account", id))
    }

    pub async fn find_account(&mut self, address: &str) -> Result<Option<Account>, IndexerError> {
        self.cache.account_by_address(self.store, address).await
    }

    pub async fn account_at(&mut self, address: &str) -> Result<Account, IndexerError> {
        self.find_account(address)
            .await?
            .ok_or_else(|| IndexerError::missing("account", address))
    }

    pub async fn baker_at(&mut self, address: &str) -> Result<Account, IndexerError> {
        let account = self.account_at(address).await?;
        if !account.is_baker() {
            return Err(IndexerError::missing("baker", address));
        }
        Ok(account)
    }

    pub fn put_account(&mut self, account: Account) {
        self.cache.put_account(account);
    }

    /// Add `delta` to an account's balance, keeping its delegate's
    /// delegated total in step.
    pub async fn change_balance(&mut self, id: i64, delta: i64) -> Result<(), IndexerError> {
        let mut account = self.account(id).await?;
        account.balance += delta;
        let delegate = account.delegate_id.filter(|d| *d != account.id);
        self.put_account(account);
        if let Some(delegate_id) = delegate {
            let mut baker = self.account(delegate_id).await?;
            baker.external_delegated_balance += delta;
            self.put_account(baker);
        }
        Ok(())
    }

    /// Allocate the next account id for `address`.
    pub async fn create_account(&mut self, address: &str) -> Result<Account, IndexerError> {
        self.state.account_counter += 1;
        let account = Account::new_user(self.state.account_counter, address, self.level);
        self.put_account(account.clone());
        self.new_accounts += 1;
        if !self.is_revert() && self.block.is_some() {
            self.update_block(|b| b.events.insert(BlockEvents::NEW_ACCOUNTS))?;
        }
        Ok(account)
    }

    /// Undo [`create_account`](Self::create_account). Accounts are removed
    /// in reverse creation order.
    pub async fn remove_created_account(&mut self, id: i64) -> Result<(), IndexerError> {
        let account = self.account(id).await?;
        if account.id != self.state.account_counter {
            return Err(IndexerError::Other(format!(
                "account {} is not the last one allocated ({})",
                account.id, self.state.account_counter
            )));
        }
        self.cache.remove_account(id);
        self.state.account_counter -= 1;
        Ok(())
    }

    // ─── Statistics ──────────────────────────────────────────────────────────

    pub async fn update_statistics(&mut self, f: impl FnOnce(&mut Statistics)) -> Result<(), IndexerError> {
        let mut stats = self
            .cache
            .statistics(self.store, self.level)
            .await?
            .ok_or_else(|| IndexerError::missing("statistics", self.level))?;
        f(&mut stats);
        self.cache.put_statistics(stats);
        Ok(())
    }

    // ─── Baker cycles ────────────────────────────────────────────────────────

    pub async fn baker_cycle(&mut self, cycle: i64, baker_id: i64) -> Result<Option<BakerCycle>, IndexerError> {
        self.cache.baker_cycle(self.store, cycle, baker_id).await
    }

    /// Modify a baker's cycle ledger, which must exist.
    pub async fn update_baker_cycle(
        &mut self,
        cycle: i64,
        baker_id: i64,
        f: impl FnOnce(&mut BakerCycle),
    ) -> Result<(), IndexerError> {
        if self.update_baker_cycle_if_present(cycle, baker_id, f).await? {
            Ok(())
        } else {
            Err(IndexerError::missing("baker cycle", format!("{cycle}/{baker_id}")))
        }
    }

    /// Modify a baker's cycle ledger if the baker was in that cycle's
    /// snapshot. Returns whether it was.
    pub async fn update_baker_cycle_if_present(
        &mut self,
        cycle: i64,
        baker_id: i64,
        f: impl FnOnce(&mut BakerCycle),
    ) -> Result<bool, IndexerError> {
        match self.baker_cycle(cycle, baker_id).await? {
            Some(mut bc) => {
                f(&mut bc);
                self.cache.put_baker_cycle(bc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ─── Node inputs ─────────────────────────────────────────────────────────

    /// Constants reported by the node at this level.
    pub async fn node_constants(&mut self) -> Result<RawConstants, IndexerError> {
        if let Some(c) = &self.constants {
            return Ok(c.clone());
        }
        let c = self.node.constants(self.level).await?;
        self.constants = Some(c.clone());
        Ok(c)
    }

    pub async fn seed(&mut self, cycle: i64) -> Result<String, IndexerError> {
        if let Some(seed) = self.seeds.get(&cycle) {
            return Ok(seed.clone());
        }
        let seed = self.node.cycle_seed(self.level, cycle).await?;
        self.seeds.insert(cycle, seed.clone());
        Ok(seed)
    }
}
