//! Settings consumed by the indexer and its binary.
//!
//! Loaded from YAML; every field has a default so a partial file (or none at
//! all) yields a working configuration.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub observer: ObserverSettings,
    /// Protocol hash → handler version.
    #[serde(default = "default_protocols")]
    pub protocols: Vec<ProtocolEntry>,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            store: StoreSettings::default(),
            observer: ObserverSettings::default(),
            protocols: default_protocols(),
            logging: LogConfig::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML string.
    pub fn from_yaml(text: &str) -> Result<Self, IndexerError> {
        serde_yaml::from_str(text).map_err(|e| IndexerError::decode("settings", e))
    }

    /// Read and parse a YAML settings file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Other(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }
}

// ─── Node ─────────────────────────────────────────────────────────────────────

/// Where and how to reach the chain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_node_url")]
    pub url: String,
    /// Per-request timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per request before the error is surfaced as transient.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay (milliseconds); doubles on each attempt.
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_initial_ms: default_retry_initial_ms(),
        }
    }
}

fn default_node_url() -> String {
    "http://localhost:8732".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    200
}

// ─── Store ────────────────────────────────────────────────────────────────────

/// Which backend holds the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,
    /// SQLite connection string, e.g. `sqlite://index.db?mode=rwc`.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "sqlite://stakeindex.db?mode=rwc".into()
}

// ─── Observer ─────────────────────────────────────────────────────────────────

/// How the observer learns about new remote heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeadMode {
    #[default]
    Polling,
    Streaming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadSettings {
    #[serde(default)]
    pub mode: HeadMode,
    /// Polling period (milliseconds); also the reconnect delay when streaming.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Follow the head this many levels behind.
    #[serde(default)]
    pub lag: i64,
}

impl Default for HeadSettings {
    fn default() -> Self {
        Self {
            mode: HeadMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            lag: 0,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverSettings {
    /// Run consistency checks after every commit and revert.
    #[serde(default)]
    pub diagnostics: bool,
    /// Treat a failed check as rebase-required instead of a warning.
    #[serde(default)]
    pub diagnostics_fatal: bool,
    /// Check proposers and attesters against local rights before commit.
    #[serde(default)]
    pub strict_validation: bool,
    /// Protocol hash whose handler serves unknown protocols.
    #[serde(default)]
    pub fallback_protocol: Option<String>,
    #[serde(default)]
    pub head: HeadSettings,
    #[serde(default = "default_sync_status_interval_ms")]
    pub sync_status_interval_ms: u64,
    /// Delay before retrying after a transient failure.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            diagnostics: false,
            diagnostics_fatal: false,
            strict_validation: false,
            fallback_protocol: None,
            head: HeadSettings::default(),
            sync_status_interval_ms: default_sync_status_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_sync_status_interval_ms() -> u64 {
    5_000
}

fn default_retry_backoff_ms() -> u64 {
    3_000
}

// ─── Protocols ────────────────────────────────────────────────────────────────

/// Handler versions shipped with the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    Genesis,
    Bootstrap,
    V1,
    V2,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Genesis => write!(f, "genesis"),
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    pub hash: String,
    pub version: ProtocolVersion,
}

impl ProtocolEntry {
    pub fn new(hash: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            hash: hash.into(),
            version,
        }
    }
}

pub const GENESIS_PROTOCOL: &str = "PrihK96nBAFSxVL1GLJTVhu9YnzkMFiBeuJRPA8NwuZVZCE1L6i";
pub const BOOTSTRAP_PROTOCOL: &str = "Ps9mPmXaRzmzk35gbAYNCAw6UtdQ4KcJ2Eukxpe8aTcMwmwWL9";
pub const V1_PROTOCOL: &str = "PtStakeV1Base7yQ4o9gSjRjxV9uyyU5a9Gd1Xp4y1e2nQbfEaK";
pub const V2_PROTOCOL: &str = "PtStakeV2Pool4kxT3qmb7rXJ3m2zF1s8dLqSxvh8cNWcEvGRh";

fn default_protocols() -> Vec<ProtocolEntry> {
    vec![
        ProtocolEntry::new(GENESIS_PROTOCOL, ProtocolVersion::Genesis),
        ProtocolEntry::new(BOOTSTRAP_PROTOCOL, ProtocolVersion::Bootstrap),
        ProtocolEntry::new(V1_PROTOCOL, ProtocolVersion::V1),
        ProtocolEntry::new(V2_PROTOCOL, ProtocolVersion::V2),
    ]
}

// ─── Logging ──────────────────────────────────────────────────────────────────

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs instead of text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Directive string for an `EnvFilter`: `"info,stakeindex_sync=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_defaults() {
        let s = Settings::from_yaml("{}").unwrap();
        assert_eq!(s.node.url, "http://localhost:8732");
        assert_eq!(s.store.kind, StoreKind::Memory);
        assert_eq!(s.observer.head.mode, HeadMode::Polling);
        assert_eq!(s.observer.retry_backoff_ms, 3_000);
        assert!(!s.observer.diagnostics);
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.protocols.len(), 4);
        assert_eq!(s.protocols[0].version, ProtocolVersion::Genesis);
    }

    #[test]
    fn protocol_table_override() {
        let yaml = r#"
protocols:
  - hash: PtCustom
    version: v2
"#;
        let s = Settings::from_yaml(yaml).unwrap();
        assert_eq!(s.protocols, vec![ProtocolEntry::new("PtCustom", ProtocolVersion::V2)]);
    }

    #[test]
    fn partial_yaml_overrides() {
        let yaml = r#"
node:
  url: http://node:8732
store:
  kind: sqlite
  path: sqlite::memory:
observer:
  strict_validation: true
  fallback_protocol: PtV2
  head:
    mode: streaming
    lag: 2
logging:
  level: debug
  components:
    stakeindex-sync: trace
"#;
        let s = Settings::from_yaml(yaml).unwrap();
        assert_eq!(s.node.url, "http://node:8732");
        assert_eq!(s.node.max_retries, 3);
        assert_eq!(s.store.kind, StoreKind::Sqlite);
        assert!(s.observer.strict_validation);
        assert_eq!(s.observer.fallback_protocol.as_deref(), Some("PtV2"));
        assert_eq!(s.observer.head.mode, HeadMode::Streaming);
        assert_eq!(s.observer.head.lag, 2);
        assert_eq!(s.observer.head.poll_interval_ms, 1_000);
        assert_eq!(s.logging.directives(), "debug,stakeindex_sync=trace");
    }

    #[test]
    fn bad_yaml_is_decode_error() {
        let err = Settings::from_yaml("observer: [1, 2]").unwrap_err();
        assert!(matches!(err, IndexerError::Decode { .. }));
    }
}
