//! The reconciliation worker.
//!
//! On every remote head the worker takes the engine lock and loops:
//! compare the local head with the node ([`decide`]), then either apply
//! the next level, revert until the node agrees with the local hash, or
//! stop when up to date. Errors are classified by the engine:
//!
//! - **rebase-required**: reload the checkpoint, then reconcile again;
//! - **transient**: wait `retry_backoff`, then reconcile again;
//! - anything else stops the worker and is returned to the caller.
//!
//! Cancellation is checked between levels, so a level in flight always
//! finishes its transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stakeindex_core::config::{HeadMode, ObserverSettings};
use stakeindex_core::error::IndexerError;
use stakeindex_core::raw::RawHeader;
use stakeindex_core::reconcile::{decide, rebase_done, Decision, RebaseReason};
use stakeindex_node::NodeClient;
use stakeindex_protocols::Engine;

use crate::notifier::HeadNotifier;
use crate::state::ObserverState;
use crate::status::StatusSync;

// ─── Worker ──────────────────────────────────────────────────────────────────

pub struct Observer {
    engine: Arc<Mutex<Engine>>,
    node: Arc<dyn NodeClient>,
    heads: watch::Receiver<Option<RawHeader>>,
    state: watch::Sender<ObserverState>,
    synced: watch::Sender<Option<DateTime<Utc>>>,
    retry_backoff: Duration,
    cancel: CancellationToken,
}

impl Observer {
    /// Run until cancelled or a fatal error.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        let result = self.work().await;
        match &result {
            Ok(()) => {
                self.set_state(ObserverState::Stopped);
                tracing::info!("Observer stopped");
            }
            Err(e) => {
                self.set_state(ObserverState::Failed);
                tracing::error!(error = %e, "Observer stopped on fatal error");
            }
        }
        result
    }

    async fn work(&mut self) -> Result<(), IndexerError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let head = self.heads.borrow_and_update().clone();
            let Some(head) = head else {
                if !self.wait_for_head().await {
                    return Ok(());
                }
                continue;
            };

            match self.reconcile(head).await {
                Ok(()) => {
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    self.set_state(ObserverState::Idle);
                    if !self.heads.has_changed().unwrap_or(false) && !self.wait_for_head().await {
                        return Ok(());
                    }
                }
                Err(e) if e.requires_rebase() => {
                    tracing::warn!(error = %e, "Rebase required, reloading state");
                    if let Err(e) = self.engine.lock().await.reset().await {
                        if !e.is_transient() {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "State reload failed");
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.retry_backoff.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    self.set_state(ObserverState::Idle);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for the next remote head. Returns `false` when cancelled.
    async fn wait_for_head(&mut self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            changed = self.heads.changed() => changed.is_ok(),
        }
    }

    /// Bring the local branch onto the remote one, level by level.
    async fn reconcile(&mut self, mut head: RawHeader) -> Result<(), IndexerError> {
        let engine = self.engine.clone();
        let mut engine = engine.lock().await;
        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ObserverState::Stopping);
                return Ok(());
            }
            if self.heads.has_changed().unwrap_or(false) {
                if let Some(newer) = self.heads.borrow_and_update().clone() {
                    head = newer;
                }
            }

            let local = engine.local_head();
            let at_local = if local.level >= 0 {
                self.node.header(local.level).await?
            } else {
                None
            };
            match decide(&local, &head, at_local.as_ref()) {
                Decision::UpToDate => {
                    self.synced.send_replace(Some(Utc::now()));
                    return Ok(());
                }
                Decision::Advance { next_level } => {
                    self.set_state(ObserverState::Advancing);
                    let block = self.node.block(next_level).await?.ok_or_else(|| IndexerError::RebaseRequired {
                        level: next_level,
                        reason: "block vanished from the node".into(),
                    })?;
                    engine.commit(&block).await?;
                    tracing::debug!(level = next_level, remote = head.level, "Advanced");
                }
                Decision::Rebase { reason } => {
                    self.set_state(ObserverState::Rebasing);
                    self.rebase(&mut engine, reason).await?;
                }
            }
        }
    }

    /// Revert until the node knows the local head.
    async fn rebase(&self, engine: &mut Engine, reason: RebaseReason) -> Result<(), IndexerError> {
        let from = engine.state().level;
        tracing::warn!(level = from, reason = %reason, "Local branch diverged, rebasing");
        loop {
            let local = engine.local_head();
            let at_local = if local.level >= 0 {
                self.node.header(local.level).await?
            } else {
                None
            };
            if rebase_done(&local, at_local.as_ref()) {
                break;
            }
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            engine.revert().await?;
        }
        let to = engine.state().level;
        tracing::info!(from, to, depth = from - to, "Rebase complete");
        Ok(())
    }

    fn set_state(&self, state: ObserverState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = %current, to = %state, "Observer state");
            *current = state;
            true
        });
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// A running observer: the worker, the head notifier and the status sync.
pub struct ObserverHandle {
    engine: Arc<Mutex<Engine>>,
    state: watch::Receiver<ObserverState>,
    heads: watch::Receiver<Option<RawHeader>>,
    cancel: CancellationToken,
    worker: JoinHandle<Result<(), IndexerError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ObserverHandle {
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        self.engine.clone()
    }

    pub fn state(&self) -> ObserverState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ObserverState> {
        self.state.clone()
    }

    /// The last remote head seen by the notifier.
    pub fn remote_head(&self) -> Option<RawHeader> {
        self.heads.borrow().clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the worker to exit on its own, then stop the other tasks.
    pub async fn join(self) -> Result<(), IndexerError> {
        let result = match self.worker.await {
            Ok(r) => r,
            Err(e) => Err(IndexerError::Aborted {
                reason: format!("observer task panicked: {e}"),
            }),
        };
        self.cancel.cancel();
        join_tasks(self.tasks).await;
        result
    }

    /// Request cancellation and wait for every task to finish.
    pub async fn shutdown(self) -> Result<(), IndexerError> {
        self.cancel.cancel();
        self.join().await
    }
}

/// Wait for every task, logging the ones that panicked or were aborted.
/// Returns how many did.
async fn join_tasks(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut abnormal = 0;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Observer task ended abnormally");
            abnormal += 1;
        }
    }
    abnormal
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Fluent builder for an observer.
///
/// ```rust,ignore
/// let handle = ObserverBuilder::new(engine, node)
///     .from_settings(&settings.observer)
///     .spawn();
/// handle.join().await?;
/// ```
pub struct ObserverBuilder {
    engine: Engine,
    node: Arc<dyn NodeClient>,
    head_mode: HeadMode,
    poll_interval: Duration,
    lag: i64,
    retry_backoff: Duration,
    sync_status_interval: Duration,
    cancel: CancellationToken,
}

impl ObserverBuilder {
    pub fn new(engine: Engine, node: Arc<dyn NodeClient>) -> Self {
        Self::default_with(engine, node, &ObserverSettings::default())
    }

    fn default_with(engine: Engine, node: Arc<dyn NodeClient>, settings: &ObserverSettings) -> Self {
        Self {
            engine,
            node,
            head_mode: settings.head.mode,
            poll_interval: Duration::from_millis(settings.head.poll_interval_ms),
            lag: settings.head.lag,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            sync_status_interval: Duration::from_millis(settings.sync_status_interval_ms),
            cancel: CancellationToken::new(),
        }
    }

    /// Take every timing and mode from `settings`.
    pub fn from_settings(self, settings: &ObserverSettings) -> Self {
        let cancel = self.cancel.clone();
        let mut builder = Self::default_with(self.engine, self.node, settings);
        builder.cancel = cancel;
        builder
    }

    pub fn head_mode(mut self, mode: HeadMode) -> Self {
        self.head_mode = mode;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Follow the head this many levels behind.
    pub fn lag(mut self, lag: i64) -> Self {
        self.lag = lag;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn sync_status_interval(mut self, interval: Duration) -> Self {
        self.sync_status_interval = interval;
        self
    }

    /// Stop with this token instead of a private one.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start the notifier, the status sync and the worker on the current
    /// runtime.
    pub fn spawn(self) -> ObserverHandle {
        let store = self.engine.store().clone();
        let engine = Arc::new(Mutex::new(self.engine));
        let (heads_tx, heads_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(ObserverState::Idle);
        let (synced_tx, synced_rx) = watch::channel(None);

        let notifier = HeadNotifier::new(
            self.node.clone(),
            self.head_mode,
            self.poll_interval,
            self.lag,
            heads_tx,
            self.cancel.clone(),
        );
        let status = StatusSync::new(
            store,
            heads_rx.clone(),
            synced_rx,
            self.sync_status_interval,
            self.cancel.clone(),
        );
        let observer = Observer {
            engine: engine.clone(),
            node: self.node,
            heads: heads_rx.clone(),
            state: state_tx,
            synced: synced_tx,
            retry_backoff: self.retry_backoff,
            cancel: self.cancel.clone(),
        };

        let tasks = vec![tokio::spawn(notifier.run()), tokio::spawn(status.run())];
        let worker = tokio::spawn(observer.run());
        ObserverHandle {
            engine,
            state: state_rx,
            heads: heads_rx,
            cancel: self.cancel,
            worker,
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_reports_panicked_tasks() {
        let tasks = vec![
            tokio::spawn(async {}),
            tokio::spawn(async { panic!("notifier blew up") }),
            tokio::spawn(async {}),
        ];
        assert_eq!(join_tasks(tasks).await, 1);
    }
}
