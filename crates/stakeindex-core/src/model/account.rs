//! Accounts: users and bakers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Baker,
}

/// An implicit account.
///
/// For bakers `balance` includes `own_staked_balance`. Funds staked by other
/// accounts live in the baker's `external_staked_balance` and are owned by
/// the stakers through pseudotokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub address: String,
    pub kind: AccountKind,
    pub balance: i64,
    pub counter: i64,
    pub revealed: bool,
    /// Baker this account delegates to; bakers delegate to themselves.
    pub delegate_id: Option<i64>,
    /// Level at which the account was first seen.
    pub first_level: i64,
    /// Pseudotokens held in the delegate's staking pool.
    pub staked_pseudotokens: i64,

    // Baker-only fields; zero for users.
    pub own_staked_balance: i64,
    pub external_staked_balance: i64,
    /// Sum of the spendable balances of delegators.
    pub external_delegated_balance: i64,
    pub delegators_count: i32,
    pub stakers_count: i32,
    pub issued_pseudotokens: i64,
}

impl Account {
    pub fn new_user(id: i64, address: impl Into<String>, first_level: i64) -> Self {
        Self {
            id,
            address: address.into(),
            kind: AccountKind::User,
            balance: 0,
            counter: 0,
            revealed: false,
            delegate_id: None,
            first_level,
            staked_pseudotokens: 0,
            own_staked_balance: 0,
            external_staked_balance: 0,
            external_delegated_balance: 0,
            delegators_count: 0,
            stakers_count: 0,
            issued_pseudotokens: 0,
        }
    }

    pub fn is_baker(&self) -> bool {
        self.kind == AccountKind::Baker
    }

    /// Spendable part of the balance.
    pub fn liquid_balance(&self) -> i64 {
        self.balance - self.own_staked_balance
    }

    pub fn total_staked(&self) -> i64 {
        self.own_staked_balance + self.external_staked_balance
    }

    pub fn total_delegated(&self) -> i64 {
        self.liquid_balance() + self.external_delegated_balance
    }

    /// Stake weight used for rights and voting.
    ///
    /// Delegated funds count up to `limit_of_delegation` times the staked
    /// amount.
    pub fn baking_power(&self, limit_of_delegation: i64) -> i64 {
        let staked = self.total_staked();
        staked + self.total_delegated().min(staked.saturating_mul(limit_of_delegation))
    }

    /// Value of `tokens` pseudotokens of this baker's pool, rounded down.
    pub fn pseudotokens_value(&self, tokens: i64) -> i64 {
        if self.issued_pseudotokens == 0 {
            return 0;
        }
        ((tokens as i128 * self.external_staked_balance as i128) / self.issued_pseudotokens as i128) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baker() -> Account {
        Account {
            kind: AccountKind::Baker,
            balance: 1_000,
            own_staked_balance: 400,
            external_staked_balance: 100,
            external_delegated_balance: 5_000,
            issued_pseudotokens: 50,
            ..Account::new_user(1, "tz1baker", 1)
        }
    }

    #[test]
    fn baking_power_caps_delegation() {
        let b = baker();
        assert_eq!(b.liquid_balance(), 600);
        assert_eq!(b.total_staked(), 500);
        assert_eq!(b.total_delegated(), 5_600);
        assert_eq!(b.baking_power(9), 500 + 4_500);
        assert_eq!(b.baking_power(20), 500 + 5_600);
    }

    #[test]
    fn pseudotoken_value_rounds_down() {
        let b = baker();
        assert_eq!(b.pseudotokens_value(50), 100);
        assert_eq!(b.pseudotokens_value(3), 6);
        assert_eq!(Account::new_user(2, "tz1", 1).pseudotokens_value(10), 0);
    }
}
