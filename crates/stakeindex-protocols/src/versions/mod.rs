//! Handler assembly per protocol version.
//!
//! | version   | stages                                   | operations                  |
//! |-----------|------------------------------------------|-----------------------------|
//! | genesis   | statistics, genesis, state               | none                        |
//! | bootstrap | statistics, activation, block, cycle, state | none                     |
//! | v1        | full pipeline                            | all but stake / unstake     |
//! | v2        | full pipeline                            | all                         |

pub mod bootstrap;
pub mod genesis;
pub mod migration;
pub mod v1;
pub mod v2;

pub use bootstrap::BootstrapMigration;
pub use migration::ProtocolMigration;

use std::sync::Arc;

use async_trait::async_trait;

use stakeindex_core::config::ProtocolVersion;
use stakeindex_core::error::IndexerError;

use crate::context::LevelContext;
use crate::handler::{Migration, ProtocolHandler, ProtocolHandlerBuilder};
use crate::stages::{
    ActivationStage, BakingRightsStage, BlockStage, CycleStage, OperationsStage, RewardsStage, SlashingStage,
    StateStage, StatisticsStage, VotingStage,
};

/// Build the handler for a version.
pub fn build(version: ProtocolVersion) -> ProtocolHandler {
    match version {
        ProtocolVersion::Genesis => genesis::handler(),
        ProtocolVersion::Bootstrap => bootstrap::handler(),
        ProtocolVersion::V1 => v1::handler(),
        ProtocolVersion::V2 => v2::handler(),
    }
}

/// The commit pipeline shared by the staking protocols.
pub(crate) fn full_pipeline(builder: ProtocolHandlerBuilder) -> ProtocolHandlerBuilder {
    builder
        .stage(StatisticsStage)
        .stage(ActivationStage)
        .stage(BlockStage)
        .stage(CycleStage)
        .stage(OperationsStage)
        .stage(BakingRightsStage)
        .stage(RewardsStage)
        .stage(SlashingStage)
        .stage(VotingStage)
        .stage(StateStage)
}

/// A protocol that never activates through a migration.
pub struct NoMigration;

#[async_trait]
impl Migration for NoMigration {
    async fn activate(&self, _ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn deactivate(&self, _ctx: &mut LevelContext<'_>) -> Result<(), IndexerError> {
        Ok(())
    }
}

pub(crate) fn no_migration() -> Arc<dyn Migration> {
    Arc::new(NoMigration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::model::OperationKind;

    #[test]
    fn stage_lists() {
        assert_eq!(build(ProtocolVersion::Genesis).stage_names(), ["statistics", "genesis", "state"]);
        assert_eq!(
            build(ProtocolVersion::V1).stage_names(),
            [
                "statistics",
                "activation",
                "block",
                "cycle",
                "operations",
                "baking_rights",
                "rewards",
                "slashing",
                "voting",
                "state"
            ]
        );
    }

    #[test]
    fn staking_arrives_with_v2() {
        let v1 = build(ProtocolVersion::V1);
        let v2 = build(ProtocolVersion::V2);
        assert!(v1.supports(OperationKind::Transaction));
        assert!(!v1.supports(OperationKind::Stake));
        assert!(!v1.supports(OperationKind::Unstake));
        assert!(v2.supports(OperationKind::Stake));
        assert!(v2.supports(OperationKind::Unstake));
        assert!(build(ProtocolVersion::Bootstrap).operation("transaction").is_none());
    }
}
