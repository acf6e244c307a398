//! Rights sampling and generation.

pub mod generator;
pub mod sampler;

pub use generator::{generate, GeneratedRights, RightsSampler};
pub use sampler::{decode_seed, AliasTable, SeedStream};

use stakeindex_core::model::{Account, ProtocolConstants};

/// Whether a baker takes part in a snapshot: it has own stake and enough
/// baking power.
pub fn is_active(baker: &Account, constants: &ProtocolConstants) -> bool {
    baker.is_baker()
        && baker.own_staked_balance > 0
        && baker.baking_power(constants.limit_of_delegation) >= constants.minimal_stake
}
