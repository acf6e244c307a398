//! Decides how the local branch relates to the remote one.
//!
//! The observer asks [`decide`] on every pass. Three situations force a
//! rebase:
//! 1. **Remote shorter**: the remote head is below the local level and the
//!    node does not know the local level
//! 2. **Hash mismatch**: the remote header at the local level differs
//! 3. **Missing header**: the node no longer knows the local level
//!
//! A remote head below the local level is not a fork by itself: with a lag,
//! or behind a stale head source, the local head may already be ahead of the
//! published head on the same branch. That case is up to date.
//!
//! A next block whose predecessor does not match the local hash surfaces
//! later, as a rebase-required validation failure of that block.

use crate::raw::RawHeader;

/// The tip of the local branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHead {
    pub level: i64,
    pub hash: String,
}

/// What the reconciliation loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Local head is the remote head, or a block of the remote branch above it.
    UpToDate,
    /// Local branch is a prefix of the remote one; apply the next level.
    Advance { next_level: i64 },
    /// Local head is not on the remote branch; revert it.
    Rebase { reason: RebaseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseReason {
    RemoteShorter,
    HashMismatch,
    MissingHeader,
}

impl std::fmt::Display for RebaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteShorter => write!(f, "remote chain is shorter"),
            Self::HashMismatch => write!(f, "hash mismatch"),
            Self::MissingHeader => write!(f, "local level unknown to node"),
        }
    }
}

/// Compare the local head with the remote head and with the remote header
/// at the local level (`None` when the node reported it as not found).
///
/// `remote_at_local` is ignored before genesis. It must be fetched even
/// when `remote_head` is below the local level.
pub fn decide(local: &LocalHead, remote_head: &RawHeader, remote_at_local: Option<&RawHeader>) -> Decision {
    if local.level < 0 {
        return if remote_head.level >= 0 {
            Decision::Advance { next_level: 0 }
        } else {
            Decision::UpToDate
        };
    }
    if remote_head.level < local.level {
        return match remote_at_local {
            Some(h) if h.hash == local.hash => Decision::UpToDate,
            Some(_) => Decision::Rebase {
                reason: RebaseReason::HashMismatch,
            },
            None => Decision::Rebase {
                reason: RebaseReason::RemoteShorter,
            },
        };
    }
    match remote_at_local {
        None => Decision::Rebase {
            reason: RebaseReason::MissingHeader,
        },
        Some(h) if h.hash != local.hash => Decision::Rebase {
            reason: RebaseReason::HashMismatch,
        },
        Some(_) if local.level < remote_head.level => Decision::Advance {
            next_level: local.level + 1,
        },
        Some(_) => Decision::UpToDate,
    }
}

/// Returns `true` once reverting can stop: the node agrees with the local
/// hash, or there is nothing left to revert.
pub fn rebase_done(local: &LocalHead, remote_at_local: Option<&RawHeader>) -> bool {
    local.level < 0 || remote_at_local.is_some_and(|h| h.hash == local.hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn h(level: i64, hash: &str) -> RawHeader {
        RawHeader {
            level,
            hash: hash.into(),
            predecessor: format!("pred-{hash}"),
            timestamp: DateTime::from_timestamp(level * 8, 0).unwrap(),
            protocol: "PtA".into(),
        }
    }

    fn local(level: i64, hash: &str) -> LocalHead {
        LocalHead {
            level,
            hash: hash.into(),
        }
    }

    #[test]
    fn empty_store_starts_at_genesis() {
        assert_eq!(
            decide(&local(-1, ""), &h(5, "B5"), None),
            Decision::Advance { next_level: 0 }
        );
    }

    #[test]
    fn advance_when_behind_on_same_branch() {
        let d = decide(&local(3, "B3"), &h(7, "B7"), Some(&h(3, "B3")));
        assert_eq!(d, Decision::Advance { next_level: 4 });
    }

    #[test]
    fn up_to_date_at_head() {
        let d = decide(&local(7, "B7"), &h(7, "B7"), Some(&h(7, "B7")));
        assert_eq!(d, Decision::UpToDate);
    }

    #[test]
    fn rebase_on_hash_mismatch() {
        let d = decide(&local(7, "B7"), &h(8, "X8"), Some(&h(7, "X7")));
        assert_eq!(
            d,
            Decision::Rebase {
                reason: RebaseReason::HashMismatch
            }
        );
    }

    #[test]
    fn rebase_when_remote_shorter() {
        let d = decide(&local(9, "B9"), &h(8, "B8"), None);
        assert_eq!(
            d,
            Decision::Rebase {
                reason: RebaseReason::RemoteShorter
            }
        );
    }

    #[test]
    fn ahead_of_lagged_head_on_same_branch_is_up_to_date() {
        let d = decide(&local(9, "B9"), &h(6, "B6"), Some(&h(9, "B9")));
        assert_eq!(d, Decision::UpToDate);
    }

    #[test]
    fn ahead_of_lagged_head_on_other_branch_rebases() {
        let d = decide(&local(9, "B9"), &h(6, "B6"), Some(&h(9, "X9")));
        assert_eq!(
            d,
            Decision::Rebase {
                reason: RebaseReason::HashMismatch
            }
        );
    }

    #[test]
    fn rebase_when_header_missing() {
        let d = decide(&local(4, "B4"), &h(8, "B8"), None);
        assert_eq!(
            d,
            Decision::Rebase {
                reason: RebaseReason::MissingHeader
            }
        );
    }

    #[test]
    fn rebase_stops_at_common_ancestor_or_floor() {
        assert!(rebase_done(&local(5, "B5"), Some(&h(5, "B5"))));
        assert!(!rebase_done(&local(5, "B5"), Some(&h(5, "X5"))));
        assert!(!rebase_done(&local(5, "B5"), None));
        assert!(rebase_done(&local(-1, ""), None));
    }
}
