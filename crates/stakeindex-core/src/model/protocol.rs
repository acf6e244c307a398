//! Activated protocols and their consensus constants.

use serde::{Deserialize, Serialize};

use crate::raw::RawConstants;

/// Consensus constants, derived from what the node reports at activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConstants {
    pub blocks_per_cycle: i64,
    pub rights_delay: i64,
    pub committee_size: i32,
    /// Attestation slots needed before the baking bonus kicks in.
    pub consensus_threshold: i32,
    pub cycles_per_voting_period: i64,
    pub minimal_stake: i64,
    pub limit_of_delegation: i64,
    pub edge_of_staking_billionth: i64,
    pub baking_reward_fixed: i64,
    pub baking_reward_bonus_per_slot: i64,
    pub attesting_reward_per_slot: i64,
    pub nonce_revelation_tip: i64,
    pub double_baking_slashed_percent: i64,
    pub double_attestation_slashed_percent: i64,
    /// Burned when a transfer allocates a new account.
    pub allocation_burn: i64,
    /// Hundredths of a percent.
    pub proposal_quorum: i64,
    /// Hundredths of a percent.
    pub ballot_quorum: i64,
}

impl ProtocolConstants {
    pub fn derive(raw: &RawConstants) -> Self {
        let threshold = raw
            .consensus_threshold
            .unwrap_or(raw.consensus_committee_size * 2 / 3 + 1);
        Self {
            blocks_per_cycle: raw.blocks_per_cycle,
            rights_delay: raw.consensus_rights_delay,
            committee_size: raw.consensus_committee_size,
            consensus_threshold: threshold,
            cycles_per_voting_period: raw.cycles_per_voting_period,
            minimal_stake: raw.minimal_stake,
            limit_of_delegation: raw.limit_of_delegation_over_baking,
            edge_of_staking_billionth: raw.edge_of_baking_over_staking_billionth,
            baking_reward_fixed: raw.baking_reward_fixed_portion,
            baking_reward_bonus_per_slot: raw.baking_reward_bonus_per_slot,
            attesting_reward_per_slot: raw.attesting_reward_per_slot,
            nonce_revelation_tip: raw.seed_nonce_revelation_tip,
            double_baking_slashed_percent: raw.double_baking_slashed_percentage.clamp(0, 100),
            double_attestation_slashed_percent: raw.double_attestation_slashed_percentage.clamp(0, 100),
            allocation_burn: raw.origination_size * raw.cost_per_byte,
            proposal_quorum: raw.proposal_quorum,
            ballot_quorum: raw.ballot_quorum,
        }
    }

    pub fn voting_period_length(&self) -> i64 {
        self.blocks_per_cycle * self.cycles_per_voting_period
    }
}

/// One row per activated protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub hash: String,
    pub code: i32,
    pub first_level: i64,
    /// Last level under this protocol, set when the next one activates.
    pub last_level: Option<i64>,
    /// Cycle numbering anchor: `first_cycle` starts at `first_cycle_level`.
    pub first_cycle: i64,
    pub first_cycle_level: i64,
    pub constants: ProtocolConstants,
}

impl Protocol {
    pub fn cycle_of(&self, level: i64) -> i64 {
        self.first_cycle + (level - self.first_cycle_level).div_euclid(self.constants.blocks_per_cycle)
    }

    pub fn cycle_first_level(&self, cycle: i64) -> i64 {
        self.first_cycle_level + (cycle - self.first_cycle) * self.constants.blocks_per_cycle
    }

    pub fn cycle_last_level(&self, cycle: i64) -> i64 {
        self.cycle_first_level(cycle) + self.constants.blocks_per_cycle - 1
    }

    pub fn is_cycle_start(&self, level: i64) -> bool {
        self.cycle_first_level(self.cycle_of(level)) == level
    }

    pub fn is_cycle_end(&self, level: i64) -> bool {
        self.cycle_last_level(self.cycle_of(level)) == level
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn raw_constants() -> RawConstants {
        RawConstants {
            blocks_per_cycle: 8,
            consensus_rights_delay: 2,
            consensus_committee_size: 16,
            consensus_threshold: None,
            cycles_per_voting_period: 2,
            minimal_stake: 1_000,
            limit_of_delegation_over_baking: 9,
            edge_of_baking_over_staking_billionth: 100_000_000,
            baking_reward_fixed_portion: 10_000,
            baking_reward_bonus_per_slot: 100,
            attesting_reward_per_slot: 50,
            seed_nonce_revelation_tip: 25,
            double_baking_slashed_percentage: 10,
            double_attestation_slashed_percentage: 150,
            cost_per_byte: 250,
            origination_size: 257,
            proposal_quorum: 500,
            ballot_quorum: 2_000,
        }
    }

    #[test]
    fn derive_fills_threshold_and_clamps() {
        let c = ProtocolConstants::derive(&raw_constants());
        assert_eq!(c.consensus_threshold, 11);
        assert_eq!(c.double_attestation_slashed_percent, 100);
        assert_eq!(c.allocation_burn, 64_250);
        assert_eq!(c.voting_period_length(), 16);
    }

    #[test]
    fn cycle_math() {
        let p = Protocol {
            hash: "PtA".into(),
            code: 1,
            first_level: 2,
            last_level: None,
            first_cycle: 0,
            first_cycle_level: 1,
            constants: ProtocolConstants::derive(&raw_constants()),
        };
        assert_eq!(p.cycle_of(1), 0);
        assert_eq!(p.cycle_of(8), 0);
        assert_eq!(p.cycle_of(9), 1);
        assert_eq!(p.cycle_first_level(3), 25);
        assert_eq!(p.cycle_last_level(3), 32);
        assert!(p.is_cycle_start(17));
        assert!(p.is_cycle_end(16));
        assert!(!p.is_cycle_end(17));
    }
}
