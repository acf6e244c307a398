//! Pre-commit checks of a fetched block.
//!
//! Structural checks always run and fail as rebase-required: a block that
//! does not extend the local head means the node moved to another branch.
//! Content checks run in strict mode only and are fatal: the block is on
//! the right branch but disagrees with the locally computed rights.

use serde::Deserialize;

use stakeindex_core::cache::EntityCache;
use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{AppState, Protocol, RightKey, RightKind};
use stakeindex_core::raw::RawBlock;
use stakeindex_core::store::IndexStore;

use crate::rights::RightsSampler;

fn rebase(level: i64, reason: String) -> IndexerError {
    IndexerError::Validation {
        level,
        reason,
        rebase_required: true,
    }
}

fn fatal(level: i64, reason: String) -> IndexerError {
    IndexerError::Validation {
        level,
        reason,
        rebase_required: false,
    }
}

/// The block must be the direct successor of the local head, under the
/// protocol the head announced.
pub fn validate_structure(state: &AppState, raw: &RawBlock) -> Result<(), IndexerError> {
    if raw.level != state.level + 1 {
        return Err(rebase(
            raw.level,
            format!("expected level {}, got {}", state.level + 1, raw.level),
        ));
    }
    if state.is_initial() {
        return Ok(());
    }
    if raw.predecessor != state.hash {
        return Err(rebase(
            raw.level,
            format!("predecessor {} does not match local head {}", raw.predecessor, state.hash),
        ));
    }
    if raw.protocol != state.next_protocol {
        return Err(rebase(
            raw.level,
            format!("protocol {} differs from announced {}", raw.protocol, state.next_protocol),
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct Delegate {
    delegate: String,
}

/// The proposer must hold the right for the payload round and every
/// attester must be a known baker.
pub async fn validate_content(
    cache: &mut EntityCache,
    store: &dyn IndexStore,
    protocol: &Protocol,
    raw: &RawBlock,
) -> Result<(), IndexerError> {
    let level = raw.level;
    if raw.proposer.is_empty() {
        return Err(fatal(level, "block has no proposer".into()));
    }
    let proposer = match cache.account_by_address(store, &raw.proposer).await? {
        Some(a) if a.is_baker() => a,
        _ => return Err(fatal(level, format!("unknown proposer {}", raw.proposer))),
    };

    let cycle = protocol.cycle_of(level);
    let expected = if raw.payload_round == 0 {
        let key = RightKey {
            level,
            kind: RightKind::Baking,
            slot: 0,
        };
        cache.right(store, key).await?.map(|r| r.baker_id)
    } else {
        match cache.cycle(store, cycle).await? {
            Some(cycle_row) => {
                let snapshots = cache.snapshot_balances(store, cycle).await?;
                RightsSampler::new(&cycle_row, &snapshots)?.baker(level, raw.payload_round)
            }
            None => None,
        }
    };
    match expected {
        Some(id) if id == proposer.id => {}
        Some(id) => {
            return Err(fatal(
                level,
                format!(
                    "proposer {} does not hold round {} (baker {id} does)",
                    raw.proposer, raw.payload_round
                ),
            ))
        }
        None => {
            return Err(fatal(
                level,
                format!("no baking right for round {} in cycle {cycle}", raw.payload_round),
            ))
        }
    }

    for op in raw.operations.iter().filter(|op| op.kind == "attestation") {
        let Delegate { delegate } = op.decode::<Delegate>()?;
        match cache.account_by_address(store, &delegate).await? {
            Some(a) if a.is_baker() => {}
            _ => return Err(fatal(level, format!("unknown attester {delegate} in {}", op.hash))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn block(level: i64, predecessor: &str, protocol: &str) -> RawBlock {
        RawBlock {
            level,
            hash: format!("B{level}"),
            predecessor: predecessor.into(),
            timestamp: DateTime::from_timestamp(level * 8, 0).unwrap(),
            protocol: protocol.into(),
            next_protocol: protocol.into(),
            payload_round: 0,
            proposer: String::new(),
            operations: Vec::new(),
            parameters: None,
        }
    }

    fn state() -> AppState {
        AppState {
            level: 4,
            hash: "B4".into(),
            protocol: "PtA".into(),
            next_protocol: "PtB".into(),
            ..AppState::initial()
        }
    }

    #[test]
    fn accepts_successor() {
        validate_structure(&state(), &block(5, "B4", "PtB")).unwrap();
        validate_structure(&AppState::initial(), &block(0, "", "PtGen")).unwrap();
    }

    #[test]
    fn structural_mismatches_require_rebase() {
        for raw in [block(6, "B4", "PtB"), block(5, "X4", "PtB"), block(5, "B4", "PtA")] {
            let err = validate_structure(&state(), &raw).unwrap_err();
            assert!(err.requires_rebase(), "{err}");
        }
        assert!(validate_structure(&AppState::initial(), &block(1, "B0", "PtA"))
            .unwrap_err()
            .requires_rebase());
    }
}
