//! Double-baking and double-attestation evidence.
//!
//! The handlers only record who accused whom; the slashing stage computes
//! and settles the amounts once all operations of the level are applied.

use async_trait::async_trait;
use serde::Deserialize;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Operation, OperationBody, OperationKind, Slashing};
use stakeindex_core::raw::RawOperation;

use super::row;
use crate::context::LevelContext;
use crate::handler::OperationHandler;

#[derive(Debug, Deserialize)]
struct EvidenceContent {
    offender: String,
    /// Level of the offending block or attestation.
    level: i64,
}

async fn accusation(ctx: &mut LevelContext<'_>, raw: &RawOperation) -> Result<Slashing, IndexerError> {
    let content: EvidenceContent = raw.decode()?;
    if content.level >= ctx.level {
        return Err(IndexerError::Validation {
            level: ctx.level,
            reason: format!("evidence {} accuses future level {}", raw.hash, content.level),
            rebase_required: false,
        });
    }
    let offender = ctx.baker_at(&content.offender).await?;
    Ok(Slashing {
        accuser_id: ctx.proposer_id()?,
        offender_id: offender.id,
        accused_level: content.level,
        ..Default::default()
    })
}

pub struct DoubleBakingHandler;

#[async_trait]
impl OperationHandler for DoubleBakingHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::DoubleBakingEvidence
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let slashing = accusation(ctx, raw).await?;
        Ok(row(id, ctx.level, raw, self.kind(), OperationBody::DoubleBaking(slashing)))
    }

    async fn revert(&self, _ctx: &mut LevelContext<'_>, _op: &Operation) -> Result<(), IndexerError> {
        Ok(())
    }
}

pub struct DoubleAttestationHandler;

#[async_trait]
impl OperationHandler for DoubleAttestationHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::DoubleAttestationEvidence
    }

    async fn apply(
        &self,
        ctx: &mut LevelContext<'_>,
        raw: &RawOperation,
        id: i64,
    ) -> Result<Operation, IndexerError> {
        let slashing = accusation(ctx, raw).await?;
        Ok(row(id, ctx.level, raw, self.kind(), OperationBody::DoubleAttestation(slashing)))
    }

    async fn revert(&self, _ctx: &mut LevelContext<'_>, _op: &Operation) -> Result<(), IndexerError> {
        Ok(())
    }
}
