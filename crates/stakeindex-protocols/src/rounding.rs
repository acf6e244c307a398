//! Integer division with an explicit rounding direction.
//!
//! Each protocol version fixes, per computation, whether the remainder is
//! dropped or rounded up. Rounding up creates one micro-unit that did not
//! exist in the exact result; those adjustments are counted so that the
//! rounding line on blocks and baker cycles shows where they went.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    Floor,
    Ceil,
}

/// Rounding directions of one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingTable {
    /// Staked share of a reward (`reward * staked / baking_power`).
    pub staked_share: Rounding,
    /// Owner's part of the staked share.
    pub own_share: Rounding,
    /// Baker's edge on the external staked share.
    pub edge: Rounding,
    /// Pseudotokens minted for a stake.
    pub pseudotoken_issue: Rounding,
    /// Pseudotokens burned for an unstake.
    pub pseudotoken_burn: Rounding,
    /// Slashed fraction of staked balances.
    pub slashing: Rounding,
}

impl RoundingTable {
    /// Every division truncates.
    pub const FLOOR: RoundingTable = RoundingTable {
        staked_share: Rounding::Floor,
        own_share: Rounding::Floor,
        edge: Rounding::Floor,
        pseudotoken_issue: Rounding::Floor,
        pseudotoken_burn: Rounding::Floor,
        slashing: Rounding::Floor,
    };

    /// Stakers get the remainder of the staked share and the baker the
    /// remainder of its edge; token burns round against the unstaker.
    pub const STAKER_FAVOURING: RoundingTable = RoundingTable {
        staked_share: Rounding::Ceil,
        own_share: Rounding::Floor,
        edge: Rounding::Ceil,
        pseudotoken_issue: Rounding::Floor,
        pseudotoken_burn: Rounding::Ceil,
        slashing: Rounding::Floor,
    };
}

/// `value * numerator / denominator` in the given direction.
///
/// Returns the quotient and whether it was rounded up. A zero denominator
/// yields zero.
pub fn mul_div(value: i64, numerator: i64, denominator: i64, rounding: Rounding) -> (i64, bool) {
    if denominator == 0 {
        return (0, false);
    }
    let product = value as i128 * numerator as i128;
    let d = denominator as i128;
    let q = product.div_euclid(d);
    let exact = product.rem_euclid(d) == 0;
    match rounding {
        Rounding::Floor => (q as i64, false),
        Rounding::Ceil if exact => (q as i64, false),
        Rounding::Ceil => (q as i64 + 1, true),
    }
}
