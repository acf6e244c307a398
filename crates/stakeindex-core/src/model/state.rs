//! The singleton checkpoint row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of the local branch plus the id counters.
///
/// Written exactly once per commit or revert, inside the same store
/// transaction as the rest of the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// Last applied level; `-1` before genesis.
    pub level: i64,
    pub hash: String,
    /// Protocol of the last applied block.
    pub protocol: String,
    /// Protocol announced for the next block.
    pub next_protocol: String,
    pub timestamp: DateTime<Utc>,
    pub cycle: i64,
    pub voting_period: i64,
    pub voting_epoch: i64,
    /// Last assigned account id.
    pub account_counter: i64,
    /// Last assigned operation id.
    pub operation_counter: i64,
}

impl AppState {
    /// State before genesis has been applied.
    pub fn initial() -> Self {
        Self {
            level: -1,
            hash: String::new(),
            protocol: String::new(),
            next_protocol: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            cycle: -1,
            voting_period: -1,
            voting_epoch: -1,
            account_counter: 0,
            operation_counter: 0,
        }
    }

    /// Returns `true` if nothing has been applied yet.
    pub fn is_initial(&self) -> bool {
        self.level < 0
    }

    /// Returns `true` if the next block runs under a newly activated protocol.
    pub fn protocol_switch_pending(&self) -> bool {
        self.level >= 0 && self.protocol != self.next_protocol
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Remote head as last seen by the status-sync task.
///
/// Stored next to [`AppState`] but written independently of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub known_head: i64,
    pub known_hash: String,
    pub last_sync: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_has_no_pending_switch() {
        let s = AppState::initial();
        assert!(s.is_initial());
        assert!(!s.protocol_switch_pending());
    }

    #[test]
    fn pending_switch_after_announcement() {
        let s = AppState {
            level: 1,
            protocol: "PtBoot".into(),
            next_protocol: "PtA".into(),
            ..AppState::initial()
        };
        assert!(s.protocol_switch_pending());
    }
}
