//! Tracks the remote head.
//!
//! The notifier publishes the latest head into a `watch` channel. The
//! channel keeps only the newest value, so any number of heads arriving
//! while the worker is busy coalesce into one wake-up.
//!
//! Two modes:
//! - **Polling**: ask the node for its head every `poll_interval`.
//! - **Streaming**: follow the node's head monitor, reconnecting after
//!   `poll_interval` when the stream fails or ends.
//!
//! With a non-zero `lag` the published head is the header `lag` levels
//! below the node's head.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use stakeindex_core::config::HeadMode;
use stakeindex_core::error::IndexerError;
use stakeindex_core::raw::RawHeader;
use stakeindex_node::NodeClient;

pub struct HeadNotifier {
    node: Arc<dyn NodeClient>,
    mode: HeadMode,
    poll_interval: Duration,
    lag: i64,
    tx: watch::Sender<Option<RawHeader>>,
    cancel: CancellationToken,
}

impl HeadNotifier {
    pub fn new(
        node: Arc<dyn NodeClient>,
        mode: HeadMode,
        poll_interval: Duration,
        lag: i64,
        tx: watch::Sender<Option<RawHeader>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node,
            mode,
            poll_interval,
            lag: lag.max(0),
            tx,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        tracing::info!(mode = ?self.mode, lag = self.lag, "Head notifier started");
        match self.mode {
            HeadMode::Polling => self.poll().await,
            HeadMode::Streaming => self.stream().await,
        }
        tracing::debug!("Head notifier stopped");
    }

    async fn poll(&self) {
        loop {
            match self.node.head().await {
                Ok(head) => self.observe(head).await,
                Err(e) => tracing::warn!(error = %e, "Head poll failed"),
            }
            if !self.pause().await {
                return;
            }
        }
    }

    async fn stream(&self) {
        loop {
            match self.node.monitor_heads().await {
                Ok(mut heads) => {
                    // The monitor only announces future heads.
                    match self.node.head().await {
                        Ok(head) => self.observe(head).await,
                        Err(e) => tracing::warn!(error = %e, "Head fetch failed"),
                    }
                    loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            next = heads.next() => match next {
                                Some(Ok(head)) => self.observe(head).await,
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "Head stream failed");
                                    break;
                                }
                                None => {
                                    tracing::warn!("Head stream closed");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Cannot open head stream"),
            }
            if !self.pause().await {
                return;
            }
        }
    }

    /// Wait one interval. Returns `false` when cancelled.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    async fn observe(&self, head: RawHeader) {
        match self.lagged(head).await {
            Ok(Some(head)) => self.publish(head),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Lagged header fetch failed"),
        }
    }

    async fn lagged(&self, head: RawHeader) -> Result<Option<RawHeader>, IndexerError> {
        if self.lag == 0 {
            return Ok(Some(head));
        }
        let target = head.level - self.lag;
        if target < 0 {
            return Ok(None);
        }
        self.node.header(target).await
    }

    fn publish(&self, head: RawHeader) {
        let level = head.level;
        let changed = self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&head) {
                return false;
            }
            *current = Some(head);
            true
        });
        if changed {
            tracing::trace!(level, "New remote head");
        }
    }
}
