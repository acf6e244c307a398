//! Reveal, transaction and delegation.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{AccountKind, InternalTransfer, Operation, OperationBody, OperationKind, OperationStatus};
use stakeindex_core::raw::RawOperation;

use super::{charge, manager_info, manager_row, refund, unexpected_body, ManagerContent};
use crate::context::LevelContext;
use crate::handler::OperationHandler;

// ─── Reveal ──────────────────────────────────────────────────────────────────

pub struct RevealHandler;

#[async_trait]
impl OperationHandler for RevealHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Reveal
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: ManagerContent = raw.decode()?;
        let info = charge(ctx, &content).await?;
        if content.status == OperationStatus::Applied {
            let mut sender = ctx.account(info.sender_id).await?;
            sender.revealed = true;
            ctx.put_account(sender);
        }
        Ok(manager_row(
            id,
            ctx.level,
            raw,
            self.kind(),
            content.status,
            info,
            OperationBody::Reveal,
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let info = manager_info(op)?;
        if op.status == OperationStatus::Applied {
            let mut sender = ctx.account(info.sender_id).await?;
            sender.revealed = false;
            ctx.put_account(sender);
        }
        refund(ctx, info).await
    }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TransactionContent {
    destination: String,
    amount: i64,
    #[serde(default)]
    internal_operations: Vec<InternalContent>,
}

/// A transfer emitted by the destination while executing the transaction.
#[derive(Debug, Deserialize)]
struct InternalContent {
    destination: String,
    amount: i64,
}

/// Moves `amount` from `sender_id` to `destination`, allocating the target
/// (and burning the allocation cost from the sender) if it does not exist.
async fn transfer(
    ctx: &mut LevelContext<'_>,
    sender_id: i64,
    destination: &str,
    amount: i64,
) -> Result<InternalTransfer, IndexerError> {
    let (target_id, allocated) = match ctx.find_account(destination).await? {
        Some(a) => (a.id, false),
        None => (ctx.create_account(destination).await?.id, true),
    };
    let burned = if allocated { ctx.constants()?.allocation_burn } else { 0 };
    ctx.change_balance(sender_id, -(amount + burned)).await?;
    ctx.change_balance(target_id, amount).await?;
    if burned != 0 {
        ctx.update_statistics(|s| s.total_burned += burned).await?;
    }
    Ok(InternalTransfer {
        sender_id,
        target_id,
        amount,
        allocated,
        burned,
    })
}

async fn undo_transfer(ctx: &mut LevelContext<'_>, t: &InternalTransfer) -> Result<(), IndexerError> {
    ctx.change_balance(t.target_id, -t.amount).await?;
    ctx.change_balance(t.sender_id, t.amount + t.burned).await?;
    if t.burned != 0 {
        ctx.update_statistics(|s| s.total_burned -= t.burned).await?;
    }
    if t.allocated {
        ctx.remove_created_account(t.target_id).await?;
    }
    Ok(())
}

pub struct TransactionHandler;

#[async_trait]
impl OperationHandler for TransactionHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Transaction
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let manager: ManagerContent = raw.decode()?;
        let content: TransactionContent = raw.decode()?;
        let info = charge(ctx, &manager).await?;
        if manager.status == OperationStatus::Failed {
            return Ok(manager_row(
                id,
                ctx.level,
                raw,
                self.kind(),
                manager.status,
                info,
                OperationBody::Failed,
            ));
        }

        let outer = transfer(ctx, info.sender_id, &content.destination, content.amount).await?;
        let mut internal = Vec::with_capacity(content.internal_operations.len());
        for i in &content.internal_operations {
            internal.push(transfer(ctx, outer.target_id, &i.destination, i.amount).await?);
        }
        Ok(manager_row(
            id,
            ctx.level,
            raw,
            self.kind(),
            manager.status,
            info,
            OperationBody::Transaction {
                target_id: outer.target_id,
                amount: outer.amount,
                allocated: outer.allocated,
                burned: outer.burned,
                internal,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let info = manager_info(op)?;
        match &op.body {
            OperationBody::Failed => {}
            OperationBody::Transaction {
                target_id,
                amount,
                allocated,
                burned,
                internal,
            } => {
                for t in internal.iter().rev() {
                    undo_transfer(ctx, t).await?;
                }
                undo_transfer(
                    ctx,
                    &InternalTransfer {
                        sender_id: info.sender_id,
                        target_id: *target_id,
                        amount: *amount,
                        allocated: *allocated,
                        burned: *burned,
                    },
                )
                .await?;
            }
            _ => return Err(unexpected_body(op)),
        }
        refund(ctx, info).await
    }
}

// ─── Delegation ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DelegationContent {
    #[serde(default)]
    delegate: Option<String>,
}

/// Sets, changes or withdraws a delegate. Delegating to oneself registers
/// the account as a baker.
pub struct DelegationHandler;

async fn attach(ctx: &mut LevelContext<'_>, baker_id: i64, balance: i64, sign: i64) -> Result<(), IndexerError> {
    let mut baker = ctx.account(baker_id).await?;
    baker.external_delegated_balance += balance * sign;
    baker.delegators_count += sign as i32;
    ctx.put_account(baker);
    Ok(())
}

#[async_trait]
impl OperationHandler for DelegationHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Delegation
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let manager: ManagerContent = raw.decode()?;
        let content: DelegationContent = raw.decode()?;
        let info = charge(ctx, &manager).await?;
        if manager.status == OperationStatus::Failed {
            return Ok(manager_row(
                id,
                ctx.level,
                raw,
                self.kind(),
                manager.status,
                info,
                OperationBody::Failed,
            ));
        }

        let mut sender = ctx.account(info.sender_id).await?;
        let prev = sender.delegate_id;
        let self_delegation = content.delegate.as_deref() == Some(sender.address.as_str());

        if sender.is_baker() {
            if !self_delegation {
                return Err(IndexerError::Validation {
                    level: ctx.level,
                    reason: format!("baker {} cannot delegate away", sender.address),
                    rebase_required: false,
                });
            }
            return Ok(manager_row(
                id,
                ctx.level,
                raw,
                self.kind(),
                manager.status,
                info,
                OperationBody::Delegation {
                    prev_delegate_id: prev,
                    new_delegate_id: prev,
                    registered: false,
                },
            ));
        }

        let new = match &content.delegate {
            None => None,
            Some(_) if self_delegation => Some(sender.id),
            Some(address) => Some(ctx.baker_at(address).await?.id),
        };
        if sender.staked_pseudotokens > 0 && new != prev {
            return Err(IndexerError::Validation {
                level: ctx.level,
                reason: format!("{} changes delegate while staking", sender.address),
                rebase_required: false,
            });
        }

        if let Some(p) = prev {
            attach(ctx, p, sender.balance, -1).await?;
        }
        sender.delegate_id = new;
        if self_delegation {
            sender.kind = AccountKind::Baker;
            tracing::info!(level = ctx.level, baker = %sender.address, "Baker registered");
        }
        let balance = sender.balance;
        ctx.put_account(sender);
        if let Some(n) = new.filter(|_| !self_delegation) {
            attach(ctx, n, balance, 1).await?;
        }

        Ok(manager_row(
            id,
            ctx.level,
            raw,
            self.kind(),
            manager.status,
            info,
            OperationBody::Delegation {
                prev_delegate_id: prev,
                new_delegate_id: new,
                registered: self_delegation,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        let info = manager_info(op)?;
        match op.body {
            OperationBody::Failed => {}
            OperationBody::Delegation {
                prev_delegate_id,
                new_delegate_id,
                registered,
            } => {
                let mut sender = ctx.account(info.sender_id).await?;
                if sender.delegate_id != new_delegate_id {
                    return Err(IndexerError::Other(format!(
                        "account {} no longer delegates as operation {} left it",
                        sender.id, op.id
                    )));
                }
                let unchanged = prev_delegate_id == new_delegate_id && !registered;
                if !unchanged {
                    let balance = sender.balance;
                    if let Some(n) = new_delegate_id.filter(|_| !registered) {
                        attach(ctx, n, balance, -1).await?;
                    }
                    if registered {
                        sender.kind = AccountKind::User;
                    }
                    sender.delegate_id = prev_delegate_id;
                    ctx.put_account(sender);
                    if let Some(p) = prev_delegate_id {
                        attach(ctx, p, balance, 1).await?;
                    }
                }
            }
            _ => return Err(unexpected_body(op)),
        }
        refund(ctx, info).await
    }
}
