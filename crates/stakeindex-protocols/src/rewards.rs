//! Splitting a baker's reward between its delegated and staked parts.
//!
//! The split uses the baker's snapshot for the cycle the reward belongs to:
//!
//! ```text
//! staked  = reward * (own_staked + external_staked) / baking_power
//! own     = staked * own_staked / (own_staked + external_staked)
//! edge    = (staked - own) * edge_billionth / 1e9
//! shared  = staked - own - edge
//! delegated = reward - staked
//! ```
//!
//! `delegated`, `own` and `edge` are paid to the baker (the last two as own
//! stake); `shared` grows the external stakers' pool.

use stakeindex_core::model::{Account, BakerCycle, Block};

use crate::rounding::{mul_div, RoundingTable};

const BILLION: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardSplit {
    pub delegated: i64,
    pub staked_own: i64,
    pub staked_edge: i64,
    pub staked_shared: i64,
    /// Micro-units created by rounding up.
    pub rounding: i64,
}

impl RewardSplit {
    pub fn total(&self) -> i64 {
        self.delegated + self.staked_own + self.staked_edge + self.staked_shared
    }

    /// Multiply every part by `sign` (`1` to apply, `-1` to revert).
    pub fn signed(self, sign: i64) -> Self {
        Self {
            delegated: self.delegated * sign,
            staked_own: self.staked_own * sign,
            staked_edge: self.staked_edge * sign,
            staked_shared: self.staked_shared * sign,
            rounding: self.rounding * sign,
        }
    }

    /// Pay the split to the baker's account.
    pub fn credit(&self, baker: &mut Account) {
        baker.balance += self.delegated + self.staked_own + self.staked_edge;
        baker.own_staked_balance += self.staked_own + self.staked_edge;
        baker.external_staked_balance += self.staked_shared;
    }

    pub fn add_block_reward(&self, block: &mut Block) {
        block.reward_delegated += self.delegated;
        block.reward_staked_own += self.staked_own;
        block.reward_staked_edge += self.staked_edge;
        block.reward_staked_shared += self.staked_shared;
        block.rounding += self.rounding;
    }

    pub fn add_to_block_rewards(&self, bc: &mut BakerCycle) {
        bc.block_rewards_delegated += self.delegated;
        bc.block_rewards_staked_own += self.staked_own;
        bc.block_rewards_staked_edge += self.staked_edge;
        bc.block_rewards_staked_shared += self.staked_shared;
        bc.rounding += self.rounding;
    }

    pub fn add_to_attestation_rewards(&self, bc: &mut BakerCycle) {
        bc.attestation_rewards_delegated += self.delegated;
        bc.attestation_rewards_staked_own += self.staked_own;
        bc.attestation_rewards_staked_edge += self.staked_edge;
        bc.attestation_rewards_staked_shared += self.staked_shared;
        bc.rounding += self.rounding;
    }
}

/// Split `reward` according to the baker's cycle snapshot.
pub fn split_reward(reward: i64, snapshot: &BakerCycle, edge_billionth: i64, table: &RoundingTable) -> RewardSplit {
    let staked = snapshot.staked();
    if reward <= 0 || staked <= 0 || snapshot.baking_power <= 0 {
        return RewardSplit {
            delegated: reward,
            ..Default::default()
        };
    }
    let mut rounding = 0;
    let (staked_part, up) = mul_div(reward, staked, snapshot.baking_power, table.staked_share);
    rounding += up as i64;
    let staked_part = staked_part.min(reward);

    let (own, up) = mul_div(staked_part, snapshot.own_staked, staked, table.own_share);
    rounding += up as i64;
    let external = staked_part - own;

    let (edge, up) = mul_div(external, edge_billionth, BILLION, table.edge);
    rounding += up as i64;
    let edge = edge.min(external);

    RewardSplit {
        delegated: reward - staked_part,
        staked_own: own,
        staked_edge: edge,
        staked_shared: external - edge,
        rounding,
    }
}

/// Fixed portion plus the bonus for attested slots above the threshold.
pub fn block_reward(fixed: i64, bonus_per_slot: i64, attested_slots: i32, threshold: i32) -> i64 {
    fixed + bonus_per_slot * (attested_slots - threshold).max(0) as i64
}
