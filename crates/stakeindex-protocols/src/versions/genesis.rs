//! Level 0.

use stakeindex_core::config::ProtocolVersion;

use super::no_migration;
use crate::handler::ProtocolHandler;
use crate::stages::{GenesisStage, StateStage, StatisticsStage};

pub fn handler() -> ProtocolHandler {
    ProtocolHandler::builder(ProtocolVersion::Genesis, no_migration())
        .stage(StatisticsStage)
        .stage(GenesisStage)
        .stage(StateStage)
        .build()
}
