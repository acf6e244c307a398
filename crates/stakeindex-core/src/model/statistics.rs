//! Per-level supply ledger.

use serde::{Deserialize, Serialize};

/// Cumulative supply totals at the end of a level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub level: i64,
    pub total_bootstrapped: i64,
    pub total_activated: i64,
    pub total_created: i64,
    pub total_burned: i64,
}

impl Statistics {
    /// Carry the previous level's totals forward.
    pub fn next(prev: Option<&Statistics>, level: i64) -> Self {
        match prev {
            Some(p) => Self { level, ..p.clone() },
            None => Self {
                level,
                ..Default::default()
            },
        }
    }

    pub fn total_supply(&self) -> i64 {
        self.total_bootstrapped + self.total_activated + self.total_created - self.total_burned
    }
}

/// Sum of what accounts hold, as reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyTotals {
    pub balances: i64,
    pub external_staked: i64,
}

impl SupplyTotals {
    pub fn total(&self) -> i64 {
        self.balances + self.external_staked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_carries_totals() {
        let prev = Statistics {
            level: 4,
            total_bootstrapped: 100,
            total_activated: 5,
            total_created: 20,
            total_burned: 3,
        };
        let s = Statistics::next(Some(&prev), 5);
        assert_eq!(s.level, 5);
        assert_eq!(s.total_supply(), 122);
        assert_eq!(Statistics::next(None, 0).total_supply(), 0);
    }
}
