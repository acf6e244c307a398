//! Block rows and their event / operation bit-flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! bit_flags {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self(1 << $bit);)*

            pub const NONE: Self = Self(0);

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

bit_flags! {
    /// Protocol-level events that happened at a block.
    BlockEvents {
        CYCLE_BEGIN = 0,
        CYCLE_END = 1,
        PROTOCOL_BEGIN = 2,
        PROTOCOL_END = 3,
        VOTING_PERIOD_BEGIN = 4,
        VOTING_PERIOD_END = 5,
        /// Stake distribution snapshotted for a future cycle.
        SNAPSHOT = 6,
        NEW_ACCOUNTS = 7,
    }
}

bit_flags! {
    /// Operation kinds present in a block.
    OperationKinds {
        ATTESTATION = 0,
        PREATTESTATION = 1,
        DOUBLE_BAKING = 2,
        DOUBLE_ATTESTATION = 3,
        ACTIVATION = 4,
        NONCE_REVELATION = 5,
        PROPOSALS = 6,
        BALLOT = 7,
        REVEAL = 8,
        TRANSACTION = 9,
        DELEGATION = 10,
        STAKE = 11,
        UNSTAKE = 12,
    }
}

/// One applied chain level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub level: i64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    /// Sequential protocol number, `-1` for genesis.
    pub protocol_code: i32,
    pub cycle: i64,
    pub payload_round: i32,
    pub proposer_id: Option<i64>,
    /// Attestation slots included in this block (for the previous level).
    pub attested_slots: i32,
    /// Baking reward, split by the proposer's stake composition.
    pub reward_delegated: i64,
    pub reward_staked_own: i64,
    pub reward_staked_edge: i64,
    pub reward_staked_shared: i64,
    pub fees: i64,
    /// Micro-units moved by ceiling rounding while splitting rewards.
    pub rounding: i64,
    pub events: BlockEvents,
    pub operations: OperationKinds,
}

impl Block {
    pub fn total_reward(&self) -> i64 {
        self.reward_delegated + self.reward_staked_own + self.reward_staked_edge + self.reward_staked_shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_insert_remove() {
        let mut e = BlockEvents::NONE;
        e.insert(BlockEvents::CYCLE_BEGIN | BlockEvents::SNAPSHOT);
        assert!(e.contains(BlockEvents::CYCLE_BEGIN));
        assert!(e.contains(BlockEvents::SNAPSHOT));
        assert!(!e.contains(BlockEvents::CYCLE_END));
        e.remove(BlockEvents::SNAPSHOT);
        assert_eq!(e, BlockEvents::CYCLE_BEGIN);
    }

    #[test]
    fn flags_serialize_as_integer() {
        let ops = OperationKinds::TRANSACTION | OperationKinds::ATTESTATION;
        assert_eq!(serde_json::to_string(&ops).unwrap(), "513");
    }
}
