//! Adds external staking through pseudotokens. Rounding leans towards
//! stakers: shared rewards round up, burns on unstake round up.

use std::sync::Arc;

use stakeindex_core::config::ProtocolVersion;

use super::v1::common_operations;
use super::{full_pipeline, ProtocolMigration};
use crate::handler::ProtocolHandler;
use crate::operations::{StakeHandler, UnstakeHandler};
use crate::rounding::RoundingTable;

pub fn handler() -> ProtocolHandler {
    let builder = ProtocolHandler::builder(ProtocolVersion::V2, Arc::new(ProtocolMigration))
        .rules(RoundingTable::STAKER_FAVOURING);
    common_operations(full_pipeline(builder))
        .operation(StakeHandler)
        .operation(UnstakeHandler)
        .build()
}
