//! Governance periods and per-baker voting snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Proposal,
    Exploration,
    Cooldown,
    Promotion,
    Adoption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Active,
    Success,
    NoProposals,
    NoQuorum,
    NoSupermajority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingPeriod {
    pub index: i64,
    pub epoch: i64,
    pub kind: PeriodKind,
    pub first_level: i64,
    pub last_level: i64,
    pub status: PeriodStatus,
    /// Proposal under vote (exploration onwards) or the winner of a
    /// proposal period.
    pub proposal: Option<String>,
    pub total_voting_power: i64,
    pub total_bakers: i32,
    /// Proposal hash → upvoting power (proposal periods only).
    pub upvotes: BTreeMap<String, i64>,
    pub yay_power: i64,
    pub nay_power: i64,
    pub pass_power: i64,
}

impl VotingPeriod {
    pub fn ballots_power(&self) -> i64 {
        self.yay_power + self.nay_power + self.pass_power
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yay,
    Nay,
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterStatus {
    None,
    Upvoted,
    VotedYay,
    VotedNay,
    VotedPass,
}

impl From<Vote> for VoterStatus {
    fn from(v: Vote) -> Self {
        match v {
            Vote::Yay => Self::VotedYay,
            Vote::Nay => Self::VotedNay,
            Vote::Pass => Self::VotedPass,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSnapshot {
    pub period: i64,
    pub baker_id: i64,
    pub voting_power: i64,
    pub status: VoterStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_maps_to_status() {
        assert_eq!(VoterStatus::from(Vote::Nay), VoterStatus::VotedNay);
        assert_eq!(
            serde_json::to_string(&PeriodStatus::NoSupermajority).unwrap(),
            "\"no_supermajority\""
        );
    }
}
