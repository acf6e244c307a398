//! Error types for the replay engine and the reconciliation loop.

use thiserror::Error;

/// Errors that can occur while indexing.
///
/// Every variant falls into exactly one class: transient (retry after a
/// backoff), rebase-required (reload local state, then reconcile) or fatal
/// (stop and surface to the operator).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error("Operation kind '{kind}' is not supported by protocol {protocol}")]
    UnsupportedOperation { kind: String, protocol: String },

    #[error("Unsupported migration: {0}")]
    UnsupportedMigration(String),

    #[error("{kind} {id} not found")]
    MissingEntity { kind: &'static str, id: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("Validation failed at level {level}: {reason}")]
    Validation {
        level: i64,
        reason: String,
        rebase_required: bool,
    },

    #[error("Rebase required at level {level}: {reason}")]
    RebaseRequired { level: i64, reason: String },

    #[error("Diagnostics failed at level {level}: {reason}")]
    Diagnostics { level: i64, reason: String },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a [`IndexerError::MissingEntity`].
    pub fn missing(kind: &'static str, id: impl ToString) -> Self {
        Self::MissingEntity {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for a [`IndexerError::Decode`].
    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for I/O failures that are retried without touching state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_))
    }

    /// Returns `true` if the local view of the chain is suspect and must be
    /// reloaded before reconciling again.
    pub fn requires_rebase(&self) -> bool {
        match self {
            Self::RebaseRequired { .. } | Self::Diagnostics { .. } => true,
            Self::Validation {
                rebase_required, ..
            } => *rebase_required,
            _ => false,
        }
    }

    /// Returns `true` if retrying cannot help (needs a code or config change).
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !self.requires_rebase()
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode("json", e)
    }
}
