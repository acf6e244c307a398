//! Stake and unstake.
//!
//! A baker staking for itself moves liquid balance into own stake. Any other
//! account stakes into its delegate's external pool and receives
//! pseudotokens: the pool's share price is `external_staked / issued`, so
//! rewards and slashing of the pool change what each token is worth without
//! touching the stakers' rows. Unstaked funds become liquid immediately.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Account, Operation, OperationBody, OperationKind, OperationStatus};
use stakeindex_core::raw::RawOperation;

use super::{charge, manager_info, manager_row, refund, unexpected_body, ManagerContent};
use crate::context::LevelContext;
use crate::handler::OperationHandler;
use crate::rounding::mul_div;

#[derive(Debug, Deserialize)]
struct AmountContent {
    amount: i64,
}

async fn delegate_of(ctx: &mut LevelContext<'_>, staker: &Account) -> Result<Account, IndexerError> {
    let Some(baker_id) = staker.delegate_id else {
        return Err(IndexerError::Validation {
            level: ctx.level,
            reason: format!("{} stakes without a delegate", staker.address),
            rebase_required: false,
        });
    };
    ctx.account(baker_id).await
}

/// Move `amount` and `tokens` into (`sign = 1`) or out of (`sign = -1`)
/// a pool. The staker's liquid balance moves the other way.
async fn move_stake(
    ctx: &mut LevelContext<'_>,
    staker_id: i64,
    baker_id: i64,
    amount: i64,
    tokens: i64,
    sign: i64,
) -> Result<(), IndexerError> {
    if staker_id == baker_id {
        let mut baker = ctx.account(baker_id).await?;
        baker.own_staked_balance += amount * sign;
        ctx.put_account(baker);
        return Ok(());
    }
    ctx.change_balance(staker_id, -amount * sign).await?;

    let mut staker = ctx.account(staker_id).await?;
    let was_staking = staker.staked_pseudotokens > 0;
    staker.staked_pseudotokens += tokens * sign;
    let is_staking = staker.staked_pseudotokens > 0;
    ctx.put_account(staker);

    let mut baker = ctx.account(baker_id).await?;
    baker.external_staked_balance += amount * sign;
    baker.issued_pseudotokens += tokens * sign;
    baker.stakers_count += is_staking as i32 - was_staking as i32;
    ctx.put_account(baker);
    Ok(())
}

// ─── Stake ───────────────────────────────────────────────────────────────────

pub struct StakeHandler;

#[async_trait]
impl OperationHandler for StakeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Stake
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let manager: ManagerContent = raw.decode()?;
        let content: AmountContent = raw.decode()?;
        let info = charge(ctx, &manager).await?;
        if manager.status == OperationStatus::Failed {
            return Ok(manager_row(id, ctx.level, raw, self.kind(), manager.status, info, OperationBody::Failed));
        }

        let staker = ctx.account(info.sender_id).await?;
        let baker = delegate_of(ctx, &staker).await?;
        if staker.liquid_balance() < content.amount {
            return Err(IndexerError::Validation {
                level: ctx.level,
                reason: format!("{} stakes more than its liquid balance", staker.address),
                rebase_required: false,
            });
        }
        let tokens = if staker.id == baker.id {
            0
        } else if baker.issued_pseudotokens == 0 || baker.external_staked_balance == 0 {
            content.amount
        } else {
            let rounding = ctx.rules().pseudotoken_issue;
            mul_div(
                content.amount,
                baker.issued_pseudotokens,
                baker.external_staked_balance,
                rounding,
            )
            .0
        };
        move_stake(ctx, staker.id, baker.id, content.amount, tokens, 1).await?;

        Ok(manager_row(
            id,
            ctx.level,
            raw,
            self.kind(),
            manager.status,
            info,
            OperationBody::Stake {
                baker_id: baker.id,
                amount: content.amount,
                pseudotokens: tokens,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let info = manager_info(op)?;
        match op.body {
            OperationBody::Failed => {}
            OperationBody::Stake {
                baker_id,
                amount,
                pseudotokens,
            } => move_stake(ctx, info.sender_id, baker_id, amount, pseudotokens, -1).await?,
            _ => return Err(unexpected_body(op)),
        }
        refund(ctx, info).await
    }
}

// ─── Unstake ─────────────────────────────────────────────────────────────────

pub struct UnstakeHandler;

#[async_trait]
impl OperationHandler for UnstakeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Unstake
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let manager: ManagerContent = raw.decode()?;
        let content: AmountContent = raw.decode()?;
        let info = charge(ctx, &manager).await?;
        if manager.status == OperationStatus::Failed {
            return Ok(manager_row(id, ctx.level, raw, self.kind(), manager.status, info, OperationBody::Failed));
        }

        let staker = ctx.account(info.sender_id).await?;
        let baker = delegate_of(ctx, &staker).await?;
        let (amount, tokens) = if staker.id == baker.id {
            (content.amount.min(baker.own_staked_balance), 0)
        } else {
            let value = baker.pseudotokens_value(staker.staked_pseudotokens);
            let amount = content.amount.min(value);
            let tokens = if amount == value {
                staker.staked_pseudotokens
            } else {
                let rounding = ctx.rules().pseudotoken_burn;
                mul_div(amount, baker.issued_pseudotokens, baker.external_staked_balance, rounding)
                    .0
                    .min(staker.staked_pseudotokens)
            };
            (amount, tokens)
        };
        move_stake(ctx, staker.id, baker.id, amount, tokens, -1).await?;

        Ok(manager_row(
            id,
            ctx.level,
            raw,
            self.kind(),
            manager.status,
            info,
            OperationBody::Unstake {
                baker_id: baker.id,
                amount,
                pseudotokens: tokens,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let info = manager_info(op)?;
        match op.body {
            OperationBody::Failed => {}
            OperationBody::Unstake {
                baker_id,
                amount,
                pseudotokens,
            } => move_stake(ctx, info.sender_id, baker_id, amount, pseudotokens, 1).await?,
            _ => return Err(unexpected_body(op)),
        }
        refund(ctx, info).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounding::Rounding;

    #[test]
    fn token_price_tracks_pool_growth() {
        let mut baker = Account::new_user(1, "tz1baker", 1);
        baker.external_staked_balance = 1_000;
        baker.issued_pseudotokens = 1_000;
        baker.external_staked_balance += 100;
        let (tokens, _) = mul_div(550, baker.issued_pseudotokens, baker.external_staked_balance, Rounding::Floor);
        assert_eq!(tokens, 500);
        assert_eq!(baker.pseudotokens_value(500), 550);
    }
}
