//! Protocol hash → handler lookup.
//!
//! Built once from the configured protocol table. Hashes sharing a version
//! share one handler instance. A hash missing from the table resolves to
//! the fallback handler when one is configured, otherwise it is an
//! [`IndexerError::UnsupportedProtocol`].

use std::collections::HashMap;
use std::sync::Arc;

use stakeindex_core::config::{ProtocolEntry, ProtocolVersion};
use stakeindex_core::error::IndexerError;

use crate::handler::ProtocolHandler;
use crate::versions;

#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    handlers: HashMap<String, Arc<ProtocolHandler>>,
    fallback: Option<Arc<ProtocolHandler>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a protocol table. `fallback` names a hash of the table.
    pub fn from_entries(entries: &[ProtocolEntry], fallback: Option<&str>) -> Result<Self, IndexerError> {
        let mut by_version: HashMap<ProtocolVersion, Arc<ProtocolHandler>> = HashMap::new();
        let mut registry = Self::new();
        for entry in entries {
            let handler = by_version
                .entry(entry.version)
                .or_insert_with(|| Arc::new(versions::build(entry.version)))
                .clone();
            registry.register(entry.hash.clone(), handler);
        }
        if let Some(hash) = fallback {
            let handler = registry
                .handlers
                .get(hash)
                .cloned()
                .ok_or_else(|| IndexerError::UnsupportedProtocol(format!("fallback {hash} is not in the table")))?;
            registry.fallback = Some(handler);
        }
        tracing::debug!(protocols = registry.handlers.len(), fallback = ?fallback, "Protocol registry built");
        Ok(registry)
    }

    pub fn register(&mut self, hash: impl Into<String>, handler: Arc<ProtocolHandler>) {
        self.handlers.insert(hash.into(), handler);
    }

    /// Handler for a protocol hash.
    pub fn resolve(&self, hash: &str) -> Result<Arc<ProtocolHandler>, IndexerError> {
        if let Some(handler) = self.handlers.get(hash) {
            return Ok(handler.clone());
        }
        match &self.fallback {
            Some(handler) => {
                tracing::warn!(protocol = %hash, version = %handler.version, "Unknown protocol, using fallback");
                Ok(handler.clone())
            }
            None => Err(IndexerError::UnsupportedProtocol(hash.to_string())),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.handlers.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<ProtocolEntry> {
        vec![
            ProtocolEntry::new("PtGen", ProtocolVersion::Genesis),
            ProtocolEntry::new("PtA", ProtocolVersion::V1),
            ProtocolEntry::new("PtA2", ProtocolVersion::V1),
            ProtocolEntry::new("PtB", ProtocolVersion::V2),
        ]
    }

    #[test]
    fn resolves_known_hashes() {
        let r = ProtocolRegistry::from_entries(&table(), None).unwrap();
        assert_eq!(r.len(), 4);
        assert_eq!(r.resolve("PtB").unwrap().version, ProtocolVersion::V2);
        assert!(Arc::ptr_eq(&r.resolve("PtA").unwrap(), &r.resolve("PtA2").unwrap()));
    }

    #[test]
    fn unknown_hash_is_fatal_without_fallback() {
        let r = ProtocolRegistry::from_entries(&table(), None).unwrap();
        let err = r.resolve("PtZ").unwrap_err();
        assert!(matches!(err, IndexerError::UnsupportedProtocol(ref h) if h == "PtZ"));
        assert!(err.is_fatal());
    }

    #[test]
    fn fallback_serves_unknown_hashes() {
        let r = ProtocolRegistry::from_entries(&table(), Some("PtB")).unwrap();
        assert_eq!(r.resolve("PtZ").unwrap().version, ProtocolVersion::V2);
        assert!(ProtocolRegistry::from_entries(&table(), Some("PtNope")).is_err());
    }
}
