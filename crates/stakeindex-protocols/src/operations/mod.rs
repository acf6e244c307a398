//! Operation handlers, grouped by family.
//!
//! Manager operations (reveal, transaction, delegation, stake, unstake)
//! share fee and counter bookkeeping: the fee moves from the sender to the
//! block proposer even when the operation failed.

pub mod anonymous;
pub mod consensus;
pub mod evidence;
pub mod governance;
pub mod manager;
pub mod staking;

pub use anonymous::{ActivateAccountHandler, NonceRevelationHandler};
pub use consensus::{AttestationHandler, PreattestationHandler};
pub use evidence::{DoubleAttestationHandler, DoubleBakingHandler};
pub use governance::{BallotHandler, ProposalsHandler};
pub use manager::{DelegationHandler, RevealHandler, TransactionHandler};
pub use staking::{StakeHandler, UnstakeHandler};

use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{ManagerInfo, Operation, OperationBody, OperationKind, OperationStatus};
use stakeindex_core::raw::RawOperation;

use crate::context::LevelContext;

/// Fields common to every manager operation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ManagerContent {
    pub source: String,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub counter: i64,
    #[serde(default = "applied")]
    pub status: OperationStatus,
}

fn applied() -> OperationStatus {
    OperationStatus::Applied
}

pub(crate) fn row(id: i64, level: i64, raw: &RawOperation, kind: OperationKind, body: OperationBody) -> Operation {
    Operation {
        id,
        level,
        hash: raw.hash.clone(),
        kind,
        status: OperationStatus::Applied,
        manager: None,
        body,
    }
}

pub(crate) fn manager_row(
    id: i64,
    level: i64,
    raw: &RawOperation,
    kind: OperationKind,
    status: OperationStatus,
    info: ManagerInfo,
    body: OperationBody,
) -> Operation {
    Operation {
        id,
        level,
        hash: raw.hash.clone(),
        kind,
        status,
        manager: Some(info),
        body: if status == OperationStatus::Failed {
            OperationBody::Failed
        } else {
            body
        },
    }
}

/// Debit the fee, credit it to the proposer and advance the counter.
pub(crate) async fn charge(ctx: &mut LevelContext<'_>, content: &ManagerContent) -> Result<ManagerInfo, IndexerError> {
    let mut sender = ctx.account_at(&content.source).await?;
    let prev_counter = sender.counter;
    sender.counter = content.counter;
    let sender_id = sender.id;
    ctx.put_account(sender);

    let info = ManagerInfo {
        sender_id,
        fee: content.fee,
        counter: content.counter,
        prev_counter,
        baker_id: ctx.proposer_id()?,
    };
    move_fee(ctx, &info, 1).await?;
    Ok(info)
}

/// Undo [`charge`].
pub(crate) async fn refund(ctx: &mut LevelContext<'_>, info: &ManagerInfo) -> Result<(), IndexerError> {
    move_fee(ctx, info, -1).await?;
    let mut sender = ctx.account(info.sender_id).await?;
    sender.counter = info.prev_counter;
    ctx.put_account(sender);
    Ok(())
}

async fn move_fee(ctx: &mut LevelContext<'_>, info: &ManagerInfo, sign: i64) -> Result<(), IndexerError> {
    let fee = info.fee * sign;
    if fee == 0 {
        return Ok(());
    }
    ctx.change_balance(info.sender_id, -fee).await?;
    ctx.change_balance(info.baker_id, fee).await?;
    ctx.update_block(|b| b.fees += fee)?;
    let cycle = ctx.cycle()?;
    ctx.update_baker_cycle_if_present(cycle, info.baker_id, |bc| bc.block_fees += fee)
        .await?;
    Ok(())
}

/// Manager info of an operation row.
pub(crate) fn manager_info(op: &Operation) -> Result<&ManagerInfo, IndexerError> {
    op.manager
        .as_ref()
        .ok_or_else(|| IndexerError::missing("manager info", format!("of operation {}", op.id)))
}

pub(crate) fn unexpected_body(op: &Operation) -> IndexerError {
    IndexerError::decode(
        format!("{} operation {}", op.kind, op.id),
        "stored body does not match its kind",
    )
}
