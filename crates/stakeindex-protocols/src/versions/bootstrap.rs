//! Level 1: the first protocol with consensus constants.
//!
//! The bootstrap migration creates the protocol row, funds the bootstrap
//! accounts from the block's parameters, generates cycles `0..=rights_delay`
//! from that initial stake and opens voting period 0.

use std::sync::Arc;

use async_trait::async_trait;

use stakeindex_core::config::ProtocolVersion;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{AccountKind, PeriodKind, Protocol, ProtocolConstants};

use crate::context::LevelContext;
use crate::handler::{Migration, ProtocolHandler};
use crate::stages::cycle::{generate_cycle, remove_cycle_generated_at};
use crate::stages::voting::{open_period, remove_period};
use crate::stages::{ActivationStage, BlockStage, CycleStage, StateStage, StatisticsStage};

pub fn handler() -> ProtocolHandler {
    ProtocolHandler::builder(ProtocolVersion::Bootstrap, Arc::new(BootstrapMigration))
        .stage(StatisticsStage)
        .stage(ActivationStage)
        .stage(BlockStage)
        .stage(CycleStage)
        .stage(StateStage)
        .build()
}

pub struct BootstrapMigration;

#[async_trait]
impl Migration for BootstrapMigration {
    async fn activate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        let level = ctx.level;
        let constants = ProtocolConstants::derive(&ctx.node_constants().await?);
        let protocol = Protocol {
            hash: raw.protocol.clone(),
            code: 0,
            first_level: level,
            last_level: None,
            first_cycle: 0,
            first_cycle_level: level,
            constants: constants.clone(),
        };
        ctx.cache.put_protocol(protocol.clone());
        ctx.protocol = Some(protocol);

        let accounts = raw
            .parameters
            .as_ref()
            .map(|p| p.bootstrap_accounts.as_slice())
            .unwrap_or_default();
        let mut total = 0;
        let mut ids = Vec::with_capacity(accounts.len());
        for entry in accounts {
            if ctx.find_account(&entry.address).await?.is_some() {
                return Err(IndexerError::Validation {
                    level,
                    reason: format!("bootstrap account {} listed twice", entry.address),
                    rebase_required: false,
                });
            }
            let mut account = ctx.create_account(&entry.address).await?;
            account.balance = entry.balance;
            if let Some(stake) = entry.baker_stake {
                account.kind = AccountKind::Baker;
                account.delegate_id = Some(account.id);
                account.balance += stake;
                account.own_staked_balance = stake;
            }
            total += account.balance;
            ids.push(account.id);
            ctx.put_account(account);
        }
        for (entry, id) in accounts.iter().zip(ids) {
            let Some(delegate) = &entry.delegate else {
                continue;
            };
            if entry.baker_stake.is_some() {
                continue;
            }
            let mut baker = ctx.baker_at(delegate).await?;
            let mut account = ctx.account(id).await?;
            account.delegate_id = Some(baker.id);
            baker.external_delegated_balance += account.balance;
            baker.delegators_count += 1;
            ctx.put_account(account);
            ctx.put_account(baker);
        }
        ctx.update_statistics(|s| s.total_bootstrapped += total).await?;

        for index in 0..=constants.rights_delay {
            generate_cycle(ctx, index, level, level + 1).await?;
        }
        let period = open_period(ctx, 0, 0, PeriodKind::Proposal, level, None, &constants).await?;
        ctx.state.voting_period = period.index;
        ctx.state.voting_epoch = period.epoch;

        tracing::info!(
            level,
            accounts = accounts.len(),
            bootstrapped = total,
            cycles = constants.rights_delay + 1,
            "Bootstrap accounts funded"
        );
        Ok(())
    }

    async fn deactivate(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let protocol = ctx.protocol()?.clone();
        let level = ctx.level;

        remove_period(ctx, 0).await?;
        ctx.state.voting_period = -1;
        ctx.state.voting_epoch = -1;

        for index in (0..=protocol.constants.rights_delay).rev() {
            remove_cycle_generated_at(ctx, index, level).await?;
        }
        while ctx.state.account_counter > 0 {
            let id = ctx.state.account_counter;
            if ctx.account(id).await?.first_level != level {
                break;
            }
            ctx.remove_created_account(id).await?;
        }
        ctx.cache.remove_protocol(&protocol.hash);
        ctx.protocol = None;
        Ok(())
    }
}
