//! Commit stages shared by the protocol versions.

pub mod activation;
pub mod baking_rights;
pub mod block;
pub mod cycle;
pub mod genesis;
pub mod operations;
pub mod rewards;
pub mod slashing;
pub mod state;
pub mod statistics;
pub mod voting;

pub use activation::ActivationStage;
pub use baking_rights::BakingRightsStage;
pub use block::BlockStage;
pub use cycle::CycleStage;
pub use genesis::GenesisStage;
pub use operations::OperationsStage;
pub use rewards::RewardsStage;
pub use slashing::SlashingStage;
pub use state::StateStage;
pub use statistics::StatisticsStage;
pub use voting::VotingStage;
