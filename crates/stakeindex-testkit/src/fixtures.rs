//! Constants, bootstrap accounts and raw operations for scenarios.

use serde_json::json;

use stakeindex_core::raw::{RawBootstrapAccount, RawConstants, RawOperation};

/// Small cycles so scenarios cross several of them quickly: 8 levels per
/// cycle, rights two cycles ahead, 16 attestation slots per level and a
/// voting period every 2 cycles.
pub fn constants() -> RawConstants {
    RawConstants {
        blocks_per_cycle: 8,
        consensus_rights_delay: 2,
        consensus_committee_size: 16,
        consensus_threshold: None,
        cycles_per_voting_period: 2,
        minimal_stake: 6_000_000_000,
        limit_of_delegation_over_baking: 9,
        edge_of_baking_over_staking_billionth: 100_000_000,
        baking_reward_fixed_portion: 5_000_000,
        baking_reward_bonus_per_slot: 2_500,
        attesting_reward_per_slot: 3_333,
        seed_nonce_revelation_tip: 125_000,
        double_baking_slashed_percentage: 10,
        double_attestation_slashed_percentage: 50,
        cost_per_byte: 250,
        origination_size: 257,
        proposal_quorum: 500,
        ballot_quorum: 2_000,
    }
}

pub const BAKERS: [&str; 4] = [
    "tz1baker1AAAAAAAAAAAAAAAAAAAAAAAAAA",
    "tz1baker2BBBBBBBBBBBBBBBBBBBBBBBBBB",
    "tz1baker3CCCCCCCCCCCCCCCCCCCCCCCCCC",
    "tz1baker4DDDDDDDDDDDDDDDDDDDDDDDDDD",
];

pub const USERS: [&str; 3] = [
    "tz1user1EEEEEEEEEEEEEEEEEEEEEEEEEEE",
    "tz1user2FFFFFFFFFFFFFFFFFFFFFFFFFFF",
    "tz1user3GGGGGGGGGGGGGGGGGGGGGGGGGGG",
];

/// Four bakers with uneven stake and three users, two of them delegating.
pub fn bootstrap_accounts() -> Vec<RawBootstrapAccount> {
    let mut accounts: Vec<RawBootstrapAccount> = BAKERS
        .iter()
        .enumerate()
        .map(|(i, address)| RawBootstrapAccount {
            address: address.to_string(),
            balance: 4_000_000_000,
            baker_stake: Some(10_000_000_000 * (i as i64 + 1)),
            delegate: None,
        })
        .collect();
    accounts.push(RawBootstrapAccount {
        address: USERS[0].to_string(),
        balance: 20_000_000_000,
        baker_stake: None,
        delegate: Some(BAKERS[0].to_string()),
    });
    accounts.push(RawBootstrapAccount {
        address: USERS[1].to_string(),
        balance: 15_000_000_000,
        baker_stake: None,
        delegate: Some(BAKERS[1].to_string()),
    });
    accounts.push(RawBootstrapAccount {
        address: USERS[2].to_string(),
        balance: 5_000_000_000,
        baker_stake: None,
        delegate: None,
    });
    accounts
}

/// Raw operations as the node would list them. Hashes are left empty; the
/// chain builder numbers them.
pub mod ops {
    use super::*;

    fn op(kind: &str, content: serde_json::Value) -> RawOperation {
        RawOperation {
            hash: String::new(),
            kind: kind.into(),
            content,
        }
    }

    pub fn attestation(delegate: &str, slots: i32) -> RawOperation {
        op("attestation", json!({ "delegate": delegate, "slots": slots }))
    }

    pub fn preattestation(delegate: &str, slots: i32) -> RawOperation {
        op("preattestation", json!({ "delegate": delegate, "slots": slots }))
    }

    pub fn transaction(source: &str, destination: &str, amount: i64, fee: i64) -> RawOperation {
        op(
            "transaction",
            json!({ "source": source, "destination": destination, "amount": amount, "fee": fee, "counter": 1 }),
        )
    }

    /// A transaction whose target forwards `(destination, amount)` pairs.
    pub fn transaction_with_internal(
        source: &str,
        destination: &str,
        amount: i64,
        fee: i64,
        internal: &[(&str, i64)],
    ) -> RawOperation {
        let internal: Vec<_> = internal
            .iter()
            .map(|(d, a)| json!({ "destination": d, "amount": a }))
            .collect();
        op(
            "transaction",
            json!({
                "source": source,
                "destination": destination,
                "amount": amount,
                "fee": fee,
                "counter": 1,
                "internal_operations": internal,
            }),
        )
    }

    pub fn delegation(source: &str, delegate: Option<&str>, fee: i64) -> RawOperation {
        op(
            "delegation",
            json!({ "source": source, "delegate": delegate, "fee": fee, "counter": 1 }),
        )
    }

    pub fn reveal(source: &str, fee: i64) -> RawOperation {
        op("reveal", json!({ "source": source, "fee": fee, "counter": 1 }))
    }

    pub fn stake(source: &str, amount: i64, fee: i64) -> RawOperation {
        op(
            "stake",
            json!({ "source": source, "amount": amount, "fee": fee, "counter": 1 }),
        )
    }

    pub fn unstake(source: &str, amount: i64, fee: i64) -> RawOperation {
        op(
            "unstake",
            json!({ "source": source, "amount": amount, "fee": fee, "counter": 1 }),
        )
    }

    pub fn activate_account(address: &str, amount: i64) -> RawOperation {
        op("activate_account", json!({ "address": address, "amount": amount }))
    }

    pub fn nonce_revelation(level: i64) -> RawOperation {
        op("seed_nonce_revelation", json!({ "level": level }))
    }

    pub fn double_baking(offender: &str, level: i64) -> RawOperation {
        op("double_baking_evidence", json!({ "offender": offender, "level": level }))
    }

    pub fn double_attestation(offender: &str, level: i64) -> RawOperation {
        op("double_attestation_evidence", json!({ "offender": offender, "level": level }))
    }

    pub fn proposals(source: &str, period: i64, proposals: &[&str]) -> RawOperation {
        op(
            "proposals",
            json!({ "source": source, "period": period, "proposals": proposals }),
        )
    }

    pub fn ballot(source: &str, period: i64, proposal: &str, ballot: &str) -> RawOperation {
        op(
            "ballot",
            json!({ "source": source, "period": period, "proposal": proposal, "ballot": ballot }),
        )
    }

    /// Mark a manager operation as failed on chain.
    pub fn failed(mut raw: RawOperation) -> RawOperation {
        raw.content["status"] = json!("failed");
        raw
    }

    /// An operation kind no protocol handles.
    pub fn unknown(kind: &str) -> RawOperation {
        op(kind, json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bakers_clear_minimal_stake() {
        let c = constants();
        for a in bootstrap_accounts().iter().filter(|a| a.baker_stake.is_some()) {
            assert!(a.baker_stake.unwrap() >= c.minimal_stake, "{}", a.address);
        }
    }

    #[test]
    fn failed_marks_status() {
        let raw = ops::failed(ops::transaction(USERS[0], USERS[1], 5, 1));
        assert_eq!(raw.content["status"], "failed");
        assert_eq!(raw.content["amount"], 5);
    }
}
