//! Dispatches the block's operations to the protocol's handlers.

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;

use crate::context::LevelContext;
use crate::handler::{CommitStage, StageOutcome};

/// Applies operations in block order and assigns their ids. An operation
/// kind without a handler stops the commit.
pub struct OperationsStage;

#[async_trait]
impl CommitStage for OperationsStage {
    fn name(&self) -> &'static str {
        "operations"
    }

    async fn apply(&self, ctx: &mut LevelContext<'_>) -> Result<StageOutcome, IndexerError> {
        let raw = ctx.raw()?;
        ctx.cache.mark_operations_loaded(ctx.level);
        if raw.operations.is_empty() {
            return Ok(StageOutcome::Skipped);
        }
        let handler = ctx.handler.clone();
        for raw_op in &raw.operations {
            let Some(op_handler) = handler.operation(&raw_op.kind) else {
                tracing::error!(
                    level = ctx.level,
                    kind = %raw_op.kind,
                    hash = %raw_op.hash,
                    "No handler for operation kind"
                );
                return Ok(StageOutcome::UnsupportedKind(raw_op.kind.clone()));
            };
            ctx.state.operation_counter += 1;
            let id = ctx.state.operation_counter;
            let op = op_handler.apply(ctx, raw_op, id).await?;
            let flag = op.kind.flag();
            ctx.update_block(|b| b.operations.insert(flag))?;
            ctx.cache.put_operation(op.clone());
            ctx.operations.push(op);
        }
        Ok(StageOutcome::Applied)
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        let handler = ctx.handler.clone();
        let ops = std::mem::take(&mut ctx.operations);
        for op in ops.iter().rev() {
            let op_handler = handler.operation(op.kind.as_str()).ok_or_else(|| IndexerError::UnsupportedOperation {
                kind: op.kind.to_string(),
                protocol: ctx.block.as_ref().map(|b| b.protocol.clone()).unwrap_or_default(),
            })?;
            op_handler.revert(ctx, op).await?;
            ctx.cache.remove_operation(op.id);
            ctx.state.operation_counter -= 1;
        }
        ctx.operations = ops;
        Ok(())
    }
}
