//! Persists the known remote head and the last time the index caught up.
//!
//! Runs on its own interval and writes through
//! [`IndexStore::save_sync_status`], which never touches level data.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use stakeindex_core::model::SyncStatus;
use stakeindex_core::raw::RawHeader;
use stakeindex_core::store::IndexStore;

pub struct StatusSync {
    store: Arc<dyn IndexStore>,
    heads: watch::Receiver<Option<RawHeader>>,
    synced: watch::Receiver<Option<DateTime<Utc>>>,
    interval: Duration,
    cancel: CancellationToken,
    saved: Option<SyncStatus>,
}

impl StatusSync {
    pub fn new(
        store: Arc<dyn IndexStore>,
        heads: watch::Receiver<Option<RawHeader>>,
        synced: watch::Receiver<Option<DateTime<Utc>>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            heads,
            synced,
            interval,
            cancel,
            saved: None,
        }
    }

    /// Run until cancelled, writing once more on the way out.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => self.flush().await,
            }
        }
        self.flush().await;
    }

    fn current(&self) -> SyncStatus {
        let head = self.heads.borrow();
        SyncStatus {
            known_head: head.as_ref().map_or(-1, |h| h.level),
            known_hash: head.as_ref().map(|h| h.hash.clone()).unwrap_or_default(),
            last_sync: *self.synced.borrow(),
        }
    }

    async fn flush(&mut self) {
        let status = self.current();
        if self.saved.as_ref() == Some(&status) {
            return;
        }
        match self.store.save_sync_status(&status).await {
            Ok(()) => {
                tracing::debug!(known_head = status.known_head, "Sync status saved");
                self.saved = Some(status);
            }
            Err(e) => tracing::warn!(error = %e, "Cannot save sync status"),
        }
    }
}
