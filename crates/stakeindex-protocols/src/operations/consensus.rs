//! Attestations and preattestations.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Operation, OperationBody, OperationKind};
use stakeindex_core::raw::RawOperation;

use super::row;
use crate::context::LevelContext;
use crate::handler::OperationHandler;

#[derive(Debug, Deserialize)]
struct ConsensusContent {
    delegate: String,
    slots: i32,
}

/// Records an attestation and adds its slots to the block's count; the
/// matching right is resolved by the rights stage.
pub struct AttestationHandler;

#[async_trait]
impl OperationHandler for AttestationHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Attestation
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: ConsensusContent = raw.decode()?;
        let baker = ctx.baker_at(&content.delegate).await?;
        ctx.update_block(|b| b.attested_slots += content.slots)?;
        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::Attestation {
                baker_id: baker.id,
                slots: content.slots,
            },
        ))
    }

    async fn revert(&self, ctx: &mut LevelContext<'_>, op: &Operation) -> Result<(), IndexerError> {
        if let OperationBody::Attestation { slots, .. } = op.body {
            ctx.update_block(|b| b.attested_slots -= slots)?;
        }
        Ok(())
    }
}

/// Preattestations carry no rewards; they are stored for completeness.
pub struct PreattestationHandler;

#[async_trait]
impl OperationHandler for PreattestationHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Preattestation
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let content: ConsensusContent = raw.decode()?;
        let baker = ctx.baker_at(&content.delegate).await?;
        Ok(row(
            id,
            ctx.level,
            raw,
            self.kind(),
            OperationBody::Preattestation {
                baker_id: baker.id,
                slots: content.slots,
            },
        ))
    }

    async fn revert(&self, _ctx: &mut LevelContext<'_>, _op: &Operation) -> Result<(), IndexerError> {
        Ok(())
    }
}
