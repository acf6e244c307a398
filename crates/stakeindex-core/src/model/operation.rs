//! Applied operations.
//!
//! Each row carries everything its revert needs: previous values that were
//! overwritten and amounts that were computed while applying.

use serde::{Deserialize, Serialize};

use super::block::OperationKinds;
use super::voting::{Vote, VoterStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Attestation,
    Preattestation,
    DoubleBakingEvidence,
    DoubleAttestationEvidence,
    ActivateAccount,
    SeedNonceRevelation,
    Proposals,
    Ballot,
    Reveal,
    Transaction,
    Delegation,
    Stake,
    Unstake,
}

impl OperationKind {
    pub const ALL: [OperationKind; 13] = [
        Self::Attestation,
        Self::Preattestation,
        Self::DoubleBakingEvidence,
        Self::DoubleAttestationEvidence,
        Self::ActivateAccount,
        Self::SeedNonceRevelation,
        Self::Proposals,
        Self::Ballot,
        Self::Reveal,
        Self::Transaction,
        Self::Delegation,
        Self::Stake,
        Self::Unstake,
    ];

    /// The `kind` discriminator used by the node.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attestation => "attestation",
            Self::Preattestation => "preattestation",
            Self::DoubleBakingEvidence => "double_baking_evidence",
            Self::DoubleAttestationEvidence => "double_attestation_evidence",
            Self::ActivateAccount => "activate_account",
            Self::SeedNonceRevelation => "seed_nonce_revelation",
            Self::Proposals => "proposals",
            Self::Ballot => "ballot",
            Self::Reveal => "reveal",
            Self::Transaction => "transaction",
            Self::Delegation => "delegation",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    pub fn flag(self) -> OperationKinds {
        match self {
            Self::Attestation => OperationKinds::ATTESTATION,
            Self::Preattestation => OperationKinds::PREATTESTATION,
            Self::DoubleBakingEvidence => OperationKinds::DOUBLE_BAKING,
            Self::DoubleAttestationEvidence => OperationKinds::DOUBLE_ATTESTATION,
            Self::ActivateAccount => OperationKinds::ACTIVATION,
            Self::SeedNonceRevelation => OperationKinds::NONCE_REVELATION,
            Self::Proposals => OperationKinds::PROPOSALS,
            Self::Ballot => OperationKinds::BALLOT,
            Self::Reveal => OperationKinds::REVEAL,
            Self::Transaction => OperationKinds::TRANSACTION,
            Self::Delegation => OperationKinds::DELEGATION,
            Self::Stake => OperationKinds::STAKE,
            Self::Unstake => OperationKinds::UNSTAKE,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Applied,
    Failed,
}

/// Fee and counter bookkeeping shared by manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub sender_id: i64,
    pub fee: i64,
    pub counter: i64,
    pub prev_counter: i64,
    /// Account that received the fee.
    pub baker_id: i64,
}

/// An internal transfer emitted by a transaction's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransfer {
    pub sender_id: i64,
    pub target_id: i64,
    pub amount: i64,
    pub allocated: bool,
    pub burned: i64,
}

/// Outcome of a double-signing accusation, filled by the slashing stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slashing {
    pub accuser_id: i64,
    pub offender_id: i64,
    /// Level of the accused block or attestation.
    pub accused_level: i64,
    pub lost_staked: i64,
    pub lost_external_staked: i64,
    pub reward: i64,
    pub burned: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationBody {
    Attestation {
        baker_id: i64,
        slots: i32,
    },
    Preattestation {
        baker_id: i64,
        slots: i32,
    },
    DoubleBaking(Slashing),
    DoubleAttestation(Slashing),
    Activation {
        account_id: i64,
        amount: i64,
        allocated: bool,
    },
    NonceRevelation {
        baker_id: i64,
        revealed_level: i64,
        reward: i64,
    },
    Proposals {
        baker_id: i64,
        period: i64,
        proposals: Vec<String>,
        voting_power: i64,
        prev_status: VoterStatus,
    },
    Ballot {
        baker_id: i64,
        period: i64,
        proposal: String,
        vote: Vote,
        voting_power: i64,
    },
    Reveal,
    Transaction {
        target_id: i64,
        amount: i64,
        allocated: bool,
        burned: i64,
        internal: Vec<InternalTransfer>,
    },
    Delegation {
        prev_delegate_id: Option<i64>,
        new_delegate_id: Option<i64>,
        registered: bool,
    },
    Stake {
        baker_id: i64,
        amount: i64,
        pseudotokens: i64,
    },
    Unstake {
        baker_id: i64,
        amount: i64,
        pseudotokens: i64,
    },
    /// A manager operation that failed on chain: fee and counter only.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub level: i64,
    pub hash: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub manager: Option<ManagerInfo>,
    pub body: OperationBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_roundtrip() {
        for k in OperationKind::ALL {
            assert_eq!(OperationKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(OperationKind::parse("smart_rollup_publish"), None);
    }

    #[test]
    fn kind_flags_are_distinct() {
        let mut all = OperationKinds::NONE;
        for k in OperationKind::ALL {
            assert!(!all.contains(k.flag()), "{k}");
            all.insert(k.flag());
        }
    }
}
