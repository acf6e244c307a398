//! Operations without a fee payer: account activation and seed nonce
//! revelation.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Operation, OperationBody, OperationKind};
use stakeindex_core::raw::RawOperation;

use super::{row, unexpected_body};
use crate::context::LevelContext;
use crate::handler::OperationHandler;

#[derive(Debug, Deserialize)]
struct ActivationContent {
    address: String,
    amount: i64,
}

/// Credits a pre-funded account, allocating it if needed.
pub struct ActivateAccountHandler;

#[async_trait]
impl OperationHandler for ActivateAccountHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::ActivateAccount
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: ActivationContent = raw.decode()?;
        let (account, allocated) = match ctx.find_account(&content.address).await? {
            Some(a) => (a, false),
            None => (ctx.create_account(&content.address).await?, true),
        };
        ctx.change_balance(account.id, content.amount).await?;
        ctx.update_statistics(|s| s.total_activated += content.amount).await?;
        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::Activation {
                account_id: account.id,
                amount: content.amount,
                allocated,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let OperationBody::Activation {
            account_id,
            amount,
            allocated,
        } = op.body
        else {
            return Err(unexpected_body(op));
        };
        ctx.change_balance(account_id, -amount).await?;
        ctx.update_statistics(|s| s.total_activated -= amount).await?;
        if allocated {
            ctx.remove_created_account(account_id).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RevelationContent {
    /// Level whose committed nonce is revealed.
    level: i64,
}

/// Pays the revelation tip to the block proposer.
pub struct NonceRevelationHandler;

#[async_trait]
impl OperationHandler for NonceRevelationHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::SeedNonceRevelation
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: RevelationContent = raw.decode()?;
        let baker_id = ctx.proposer_id()?;
        let reward = ctx.constants()?.nonce_revelation_tip;
        pay_tip(ctx, baker_id, reward).await?;
        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::NonceRevelation {
                baker_id,
                revealed_level: content.level,
                reward,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let OperationBody::NonceRevelation { baker_id, reward, .. } = op.body else {
            return Err(unexpected_body(op));
        };
        pay_tip(ctx, baker_id, -reward).await
    }
}

async fn pay_tip(ctx: &mut LevelContext<'_>, baker_id: i64, amount: i64) -> Result<(), IndexerError> {
    ctx.change_balance(baker_id, amount).await?;
    ctx.update_statistics(|s| s.total_created += amount).await?;
    let cycle = ctx.cycle()?;
    ctx.update_baker_cycle_if_present(cycle, baker_id, |bc| bc.nonce_revelation_rewards += amount)
        .await?;
    Ok(())
}
