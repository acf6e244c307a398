//! Consistency checks run after a level is flushed.
//!
//! * conservation: the statistics ledger's supply equals what accounts
//!   hold, liquid and externally staked;
//! * balances of the accounts the level touched match the node, when the
//!   node reports them;
//! * the locally generated round-0 baking right matches the node's, when
//!   the node serves rights.

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{Account, RightKey, RightKind};
use stakeindex_core::store::IndexStore;
use stakeindex_node::{NodeClient, RightsScope};

/// Discrepancies found at one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub level: i64,
    pub issues: Vec<String>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Run every check against the store as of `level`.
pub async fn check_level(
    store: &dyn IndexStore,
    node: &dyn NodeClient,
    level: i64,
    touched: &[Account],
) -> Result<Report, IndexerError> {
    let mut report = Report {
        level,
        issues: Vec::new(),
    };
    if level < 0 {
        return Ok(report);
    }

    if let Some(stats) = store.statistics(level).await? {
        let held = store.supply_totals().await?;
        if stats.total_supply() != held.total() {
            report.issues.push(format!(
                "supply {} but accounts hold {} ({} liquid, {} externally staked)",
                stats.total_supply(),
                held.total(),
                held.balances,
                held.external_staked
            ));
        }
    }

    for account in touched {
        if let Some(remote) = node.balance(level, &account.address).await? {
            if remote != account.balance {
                report.issues.push(format!(
                    "balance of {} is {} locally, {remote} on the node",
                    account.address, account.balance
                ));
            }
        }
    }

    if let Some(remote) = node.baking_rights(level, RightsScope::Level(level)).await? {
        let remote_baker = remote
            .iter()
            .find(|r| r.level == level && r.round == Some(0))
            .map(|r| r.delegate.as_str());
        let local = store
            .rights_at(level)
            .await?
            .into_iter()
            .find(|r| {
                r.key()
                    == RightKey {
                        level,
                        kind: RightKind::Baking,
                        slot: 0,
                    }
            });
        let local_baker = match local {
            Some(r) => store.account(r.baker_id).await?.map(|a| a.address),
            None => None,
        };
        if remote_baker.is_some() && local_baker.as_deref() != remote_baker {
            report.issues.push(format!(
                "round-0 right held by {} locally, {} on the node",
                local_baker.as_deref().unwrap_or("nobody"),
                remote_baker.unwrap_or("nobody")
            ));
        }
    }
    Ok(report)
}
