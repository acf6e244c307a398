//! First staking protocol: delegation only, rewards rounded down.

use std::sync::Arc;

use stakeindex_core::config::ProtocolVersion;

use super::{full_pipeline, ProtocolMigration};
use crate::handler::{ProtocolHandler, ProtocolHandlerBuilder};
use crate::operations::*;
use crate::rounding::RoundingTable;

pub fn handler() -> ProtocolHandler {
    let builder = ProtocolHandler::builder(ProtocolVersion::V1, Arc::new(ProtocolMigration))
        .rules(RoundingTable::FLOOR);
    common_operations(full_pipeline(builder)).build()
}

/// Operations every staking protocol understands.
pub(crate) fn common_operations(builder: ProtocolHandlerBuilder) -> ProtocolHandlerBuilder {
    builder
        .operation(AttestationHandler)
        .operation(PreattestationHandler)
        .operation(DoubleBakingHandler)
        .operation(DoubleAttestationHandler)
        .operation(ActivateAccountHandler)
        .operation(NonceRevelationHandler)
        .operation(ProposalsHandler)
        .operation(BallotHandler)
        .operation(RevealHandler)
        .operation(TransactionHandler)
        .operation(DelegationHandler)
}
