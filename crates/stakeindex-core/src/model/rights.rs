//! Baking and attestation rights.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightKind {
    Baking,
    Attestation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightStatus {
    Future,
    Realized,
    Missed,
}

/// Identity of a right: baking rights are unique per round, attestation
/// rights per baker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RightKey {
    pub level: i64,
    pub kind: RightKind,
    /// Round for baking rights, baker id for attestation rights.
    pub slot: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakingRight {
    pub cycle: i64,
    pub level: i64,
    pub kind: RightKind,
    pub baker_id: i64,
    pub round: Option<i32>,
    pub slots: Option<i32>,
    pub status: RightStatus,
}

impl BakingRight {
    pub fn baking(cycle: i64, level: i64, round: i32, baker_id: i64, status: RightStatus) -> Self {
        Self {
            cycle,
            level,
            kind: RightKind::Baking,
            baker_id,
            round: Some(round),
            slots: None,
            status,
        }
    }

    pub fn attestation(cycle: i64, level: i64, baker_id: i64, slots: i32) -> Self {
        Self {
            cycle,
            level,
            kind: RightKind::Attestation,
            baker_id,
            round: None,
            slots: Some(slots),
            status: RightStatus::Future,
        }
    }

    pub fn key(&self) -> RightKey {
        let slot = match self.kind {
            RightKind::Baking => self.round.unwrap_or_default() as i64,
            RightKind::Attestation => self.baker_id,
        };
        RightKey {
            level: self.level,
            kind: self.kind,
            slot,
        }
    }
}
