//! Cycles, stake snapshots and per-baker cycle ledgers.

use serde::{Deserialize, Serialize};

use super::account::Account;

/// One baking cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub index: i64,
    pub first_level: i64,
    pub last_level: i64,
    /// Level whose end state the stake snapshot was taken from.
    pub snapshot_level: i64,
    /// Hex-encoded random seed.
    pub seed: String,
    pub total_baking_power: i64,
    pub total_bakers: i32,
    pub total_staked: i64,
    pub total_delegated: i64,
    /// Level at which this row was created; reverting that level removes it.
    pub generated_level: i64,
}

/// A baker's stake breakdown at a cycle's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBalance {
    pub cycle: i64,
    pub baker_id: i64,
    pub own_staked: i64,
    pub external_staked: i64,
    pub own_delegated: i64,
    pub external_delegated: i64,
    pub delegators_count: i32,
    pub stakers_count: i32,
    pub baking_power: i64,
}

impl SnapshotBalance {
    pub fn capture(cycle: i64, baker: &Account, limit_of_delegation: i64) -> Self {
        Self {
            cycle,
            baker_id: baker.id,
            own_staked: baker.own_staked_balance,
            external_staked: baker.external_staked_balance,
            own_delegated: baker.liquid_balance(),
            external_delegated: baker.external_delegated_balance,
            delegators_count: baker.delegators_count,
            stakers_count: baker.stakers_count,
            baking_power: baker.baking_power(limit_of_delegation),
        }
    }

    pub fn staked(&self) -> i64 {
        self.own_staked + self.external_staked
    }
}

/// Per-baker, per-cycle ledger of expected and realized rights and rewards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakerCycle {
    pub cycle: i64,
    pub baker_id: i64,

    // Snapshot composition.
    pub baking_power: i64,
    pub own_staked: i64,
    pub external_staked: i64,
    pub own_delegated: i64,
    pub external_delegated: i64,
    pub delegators_count: i32,
    pub stakers_count: i32,

    // Rights.
    pub future_blocks: i32,
    pub blocks: i32,
    pub missed_blocks: i32,
    /// Attestation counters are in slots.
    pub future_attestations: i32,
    pub attestations: i32,
    pub missed_attestations: i32,

    // Rewards.
    pub block_rewards_delegated: i64,
    pub block_rewards_staked_own: i64,
    pub block_rewards_staked_edge: i64,
    pub block_rewards_staked_shared: i64,
    pub missed_block_rewards: i64,
    pub attestation_rewards_delegated: i64,
    pub attestation_rewards_staked_own: i64,
    pub attestation_rewards_staked_edge: i64,
    pub attestation_rewards_staked_shared: i64,
    pub missed_attestation_rewards: i64,
    pub block_fees: i64,
    pub nonce_revelation_rewards: i64,

    // Slashing.
    pub double_baking_lost_staked: i64,
    pub double_baking_lost_external_staked: i64,
    pub double_baking_rewards: i64,
    pub double_attestation_lost_staked: i64,
    pub double_attestation_lost_external_staked: i64,
    pub double_attestation_rewards: i64,

    pub rounding: i64,
}

impl BakerCycle {
    pub fn from_snapshot(snapshot: &SnapshotBalance) -> Self {
        Self {
            cycle: snapshot.cycle,
            baker_id: snapshot.baker_id,
            baking_power: snapshot.baking_power,
            own_staked: snapshot.own_staked,
            external_staked: snapshot.external_staked,
            own_delegated: snapshot.own_delegated,
            external_delegated: snapshot.external_delegated,
            delegators_count: snapshot.delegators_count,
            stakers_count: snapshot.stakers_count,
            ..Default::default()
        }
    }

    pub fn staked(&self) -> i64 {
        self.own_staked + self.external_staked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::account::AccountKind;

    #[test]
    fn snapshot_captures_composition() {
        let baker = Account {
            kind: AccountKind::Baker,
            balance: 3_000,
            own_staked_balance: 1_000,
            external_staked_balance: 500,
            external_delegated_balance: 700,
            delegators_count: 2,
            stakers_count: 1,
            ..Account::new_user(4, "tz1b", 1)
        };
        let snap = SnapshotBalance::capture(7, &baker, 9);
        assert_eq!(snap.own_delegated, 2_000);
        assert_eq!(snap.staked(), 1_500);
        assert_eq!(snap.baking_power, 1_500 + 2_700);

        let bc = BakerCycle::from_snapshot(&snap);
        assert_eq!(bc.cycle, 7);
        assert_eq!(bc.baker_id, 4);
        assert_eq!(bc.staked(), 1_500);
        assert_eq!(bc.future_blocks, 0);
    }
}
