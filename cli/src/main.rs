//! StakeIndex CLI — run the indexer and inspect what it has stored.
//!
//! # Commands
//! ```text
//! stakeindex run     [--node-url <url>] [--strict] [--diagnostics] [--streaming] [--lag <n>]
//! stakeindex status  [--json]
//! stakeindex info
//! ```
//!
//! Every command takes `--config <path.yaml>`; without it the built-in
//! defaults are used.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use stakeindex_core::config::{HeadMode, Settings, StoreKind, StoreSettings};
use stakeindex_core::store::IndexStore;
use stakeindex_node::HttpNodeClient;
use stakeindex_protocols::{Engine, EngineOptions, ProtocolRegistry};
use stakeindex_storage::MemoryStore;
use stakeindex_sync::ObserverBuilder;

mod logging;

#[derive(Parser)]
#[command(
    name = "stakeindex",
    about = "Proof-of-stake chain indexer — StakeIndex CLI",
    long_about = "
StakeIndex follows a chain node, replays every block through the handler of
its protocol version and keeps a queryable copy of accounts, rights, cycles
and voting periods. Forks are followed by reverting levels one at a time.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the logging directives from the config file
",
    version
)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the chain until interrupted
    Run {
        /// Node RPC endpoint (overrides node.url)
        #[arg(long)]
        node_url: Option<String>,
        /// Check proposers and attesters against local rights
        #[arg(long)]
        strict: bool,
        /// Cross-check balances with the node after every level
        #[arg(long)]
        diagnostics: bool,
        /// Subscribe to the node's head stream instead of polling
        #[arg(long)]
        streaming: bool,
        /// Stay this many levels behind the remote head
        #[arg(long)]
        lag: Option<i64>,
    },

    /// Show the local checkpoint and the last known remote head
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version, protocol table and effective settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            node_url,
            strict,
            diagnostics,
            streaming,
            lag,
        } => {
            let mut settings = settings;
            if let Some(url) = node_url {
                settings.node.url = url;
            }
            settings.observer.strict_validation |= strict;
            settings.observer.diagnostics |= diagnostics;
            if streaming {
                settings.observer.head.mode = HeadMode::Streaming;
            }
            if let Some(lag) = lag {
                settings.observer.head.lag = lag;
            }
            cmd_run(settings).await
        }

        Commands::Status { json } => cmd_status(&settings, json).await,

        Commands::Info => cmd_info(&settings),
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_yaml_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

async fn open_store(settings: &StoreSettings) -> Result<Arc<dyn IndexStore>> {
    match settings.kind {
        StoreKind::Memory => {
            let store: Arc<dyn IndexStore> = Arc::new(MemoryStore::new());
            Ok(store)
        }
        #[cfg(feature = "sqlite")]
        StoreKind::Sqlite => {
            let store = stakeindex_storage::SqliteStore::open(&settings.path)
                .await
                .with_context(|| format!("failed to open {}", settings.path))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreKind::Sqlite => bail!("sqlite store requested but the binary was built without the `sqlite` feature"),
    }
}

// ─── run ─────────────────────────────────────────────────────────────────────

async fn cmd_run(settings: Settings) -> Result<()> {
    logging::init_tracing(&settings.logging);

    let store = open_store(&settings.store).await?;
    let node = Arc::new(HttpNodeClient::from_settings(&settings.node).context("failed to build node client")?);
    let registry = Arc::new(
        ProtocolRegistry::from_entries(&settings.protocols, settings.observer.fallback_protocol.as_deref())
            .context("invalid protocol table")?,
    );
    let engine = Engine::open(store, node.clone(), registry, EngineOptions::from_settings(&settings.observer))
        .await
        .context("failed to load the checkpoint")?;

    tracing::info!(
        node = %settings.node.url,
        store = ?settings.store.kind,
        head_mode = ?settings.observer.head.mode,
        lag = settings.observer.head.lag,
        "Starting indexer"
    );

    let cancel = CancellationToken::new();
    let handle = ObserverBuilder::new(engine, node)
        .from_settings(&settings.observer)
        .cancel_token(cancel.clone())
        .spawn();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing the current level");
            interrupt.cancel();
        }
    });

    handle.join().await.context("indexer stopped")?;
    Ok(())
}

// ─── status ──────────────────────────────────────────────────────────────────

async fn cmd_status(settings: &Settings, json: bool) -> Result<()> {
    if settings.store.kind == StoreKind::Memory {
        bail!("the memory store keeps nothing between runs; configure store.kind: sqlite");
    }
    let store = open_store(&settings.store).await?;
    let state = store.app_state().await.context("failed to read the checkpoint")?;
    let sync = store.sync_status().await.context("failed to read the sync status")?;
    let lag = state
        .as_ref()
        .filter(|_| sync.known_head >= 0)
        .map(|s| sync.known_head - s.level);

    if json {
        let out = serde_json::json!({
            "state": state,
            "sync": sync,
            "lag": lag,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match &state {
        Some(s) => {
            println!("Local head:     {} ({})", s.level, s.hash);
            println!("Protocol:       {}", s.protocol);
            println!("Next protocol:  {}", s.next_protocol);
            println!("Timestamp:      {}", s.timestamp.to_rfc3339());
            println!("Cycle:          {}", s.cycle);
            println!("Voting period:  {} (epoch {})", s.voting_period, s.voting_epoch);
        }
        None => println!("Local head:     none (nothing indexed yet)"),
    }
    if sync.known_head >= 0 {
        println!("Remote head:    {} ({})", sync.known_head, sync.known_hash);
    } else {
        println!("Remote head:    unknown");
    }
    if let Some(last) = sync.last_sync {
        println!("Last in sync:   {}", last.to_rfc3339());
    }
    if let Some(lag) = lag {
        println!("Behind by:      {lag} level(s)");
    }
    Ok(())
}

// ─── info ────────────────────────────────────────────────────────────────────

fn cmd_info(settings: &Settings) -> Result<()> {
    println!("StakeIndex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Protocols:");
    for entry in &settings.protocols {
        println!("  {:<10} {}", entry.version.to_string(), entry.hash);
    }
    if let Some(fallback) = &settings.observer.fallback_protocol {
        println!("  fallback   {fallback}");
    }
    println!();
    println!("Node:          {}", settings.node.url);
    println!("Store:         {:?} ({})", settings.store.kind, settings.store.path);
    println!(
        "Heads:         {:?}, every {} ms, lag {}",
        settings.observer.head.mode, settings.observer.head.poll_interval_ms, settings.observer.head.lag
    );
    println!(
        "Checks:        strict={} diagnostics={} fatal={}",
        settings.observer.strict_validation, settings.observer.diagnostics, settings.observer.diagnostics_fatal
    );
    println!();
    println!("Backends:      memory{}", if cfg!(feature = "sqlite") { ", sqlite" } else { "" });
    Ok(())
}
