//! Payloads returned by the chain node.
//!
//! These mirror the node's JSON. Operation content is kept as a raw JSON
//! object so that each protocol version decodes the kinds it understands and
//! reports the ones it doesn't.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── RawHeader ────────────────────────────────────────────────────────────────

/// A block header, enough to track the remote head and detect forks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHeader {
    pub level: i64,
    pub hash: String,
    pub predecessor: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
}

impl RawHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &RawHeader) -> bool {
        self.level == parent.level + 1 && self.predecessor == parent.hash
    }
}

// ─── RawBlock ─────────────────────────────────────────────────────────────────

/// A full block with its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub level: i64,
    pub hash: String,
    pub predecessor: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub next_protocol: String,
    #[serde(default)]
    pub payload_round: i32,
    /// Address of the baker that produced the block (empty for genesis).
    #[serde(default)]
    pub proposer: String,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
    /// Protocol parameters, present only on the activation block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<RawParameters>,
}

impl RawBlock {
    /// The header part of this block.
    pub fn header(&self) -> RawHeader {
        RawHeader {
            level: self.level,
            hash: self.hash.clone(),
            predecessor: self.predecessor.clone(),
            timestamp: self.timestamp,
            protocol: self.protocol.clone(),
        }
    }
}

/// One operation as included in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    pub hash: String,
    pub kind: String,
    /// Everything except `hash` and `kind`.
    #[serde(flatten)]
    pub content: serde_json::Value,
}

impl RawOperation {
    /// Decode the per-kind content.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::IndexerError> {
        serde_json::from_value(self.content.clone())
            .map_err(|e| crate::IndexerError::decode(format!("{} operation {}", self.kind, self.hash), e))
    }
}

/// Genesis parameters carried by the activation block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawParameters {
    pub bootstrap_accounts: Vec<RawBootstrapAccount>,
}

/// An account funded at activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBootstrapAccount {
    pub address: String,
    /// Spendable balance.
    pub balance: i64,
    /// Registers the account as a baker with this much own stake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baker_stake: Option<i64>,
    /// Delegates a user account to this baker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<String>,
}

// ─── RawConstants ────────────────────────────────────────────────────────────

/// Protocol constants as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConstants {
    pub blocks_per_cycle: i64,
    pub consensus_rights_delay: i64,
    pub consensus_committee_size: i32,
    /// Absent on older nodes; derived as `committee * 2 / 3 + 1`.
    #[serde(default)]
    pub consensus_threshold: Option<i32>,
    pub cycles_per_voting_period: i64,
    pub minimal_stake: i64,
    pub limit_of_delegation_over_baking: i64,
    /// Baker's edge on external stake rewards, in billionths.
    pub edge_of_baking_over_staking_billionth: i64,
    pub baking_reward_fixed_portion: i64,
    pub baking_reward_bonus_per_slot: i64,
    pub attesting_reward_per_slot: i64,
    pub seed_nonce_revelation_tip: i64,
    pub double_baking_slashed_percentage: i64,
    pub double_attestation_slashed_percentage: i64,
    pub cost_per_byte: i64,
    /// Storage charged when a transfer allocates a new account.
    pub origination_size: i64,
    /// In hundredths of a percent.
    pub proposal_quorum: i64,
    /// In hundredths of a percent.
    pub ballot_quorum: i64,
}

// ─── Rights ───────────────────────────────────────────────────────────────────

/// A right as reported by the node's helper RPCs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRight {
    pub level: i64,
    pub delegate: String,
    /// Round for baking rights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<i32>,
    /// Slot count for attestation rights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<i32>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
