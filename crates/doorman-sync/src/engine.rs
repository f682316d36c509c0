//! The event loop tying everything together: periodic full resyncs, live
//! events, and publication of the classified view.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use doorman_gateway::Fanout;
use doorman_types::ChatEvent;

use crate::{Classifier, SyncError, Synchronizer};

/// A single sequential task: one trigger handled at a time, so there are no
/// races on the last-published-view comparison.
pub struct Engine {
    sync: Synchronizer,
    classifier: Classifier,
    fanout: Fanout,
    resync_interval: Duration,
    last_published: Option<Vec<u8>>,
}

impl Engine {
    /// Build the engine and perform the mandatory startup resync. An error
    /// here is fatal: without a populated store there is nothing to serve.
    pub async fn start(
        sync: Synchronizer,
        classifier: Classifier,
        fanout: Fanout,
        resync_interval: Duration,
    ) -> Result<Self, SyncError> {
        info!("Starting engine...");
        sync.full_resync().await?;
        info!("Engine started");
        Ok(Self {
            sync,
            classifier,
            fanout,
            resync_interval,
            last_published: None,
        })
    }

    /// Run until cancelled or until the live event stream closes. In steady
    /// state a failed resync or live event is logged and skipped; only a
    /// view serialization failure is fatal.
    pub async fn run(
        mut self,
        mut live_rx: mpsc::Receiver<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        let mut resync = tokio::time::interval(self.resync_interval);
        // The first tick fires immediately and startup already resynced
        resync.tick().await;
        self.refresh()?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Engine stopping");
                    return Ok(());
                }
                _ = resync.tick() => {
                    if let Err(e) = self.sync.full_resync().await {
                        warn!("Periodic resync failed: {}", e);
                    }
                }
                event = live_rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.sync.apply_live_event(&event) {
                                warn!("Cannot apply live event: {}", e);
                            }
                        }
                        None => {
                            info!("Live event stream closed, engine stopping");
                            return Ok(());
                        }
                    }
                }
            }
            self.refresh()?;
        }
    }

    /// Recompute the classified view and publish it, unless it serializes to
    /// the same bytes as the previously published view. A store read failure
    /// skips this cycle's publish and leaves the last-known-good view
    /// standing.
    fn refresh(&mut self) -> Result<(), SyncError> {
        let pair = match self.classifier.channel_pair() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Cannot compute channel pair: {}", e);
                return Ok(());
            }
        };
        let bytes = serde_json::to_vec(&pair)?;
        if self.last_published.as_deref() != Some(bytes.as_slice()) {
            self.last_published = Some(bytes.clone());
            self.fanout.publish(Bytes::from(bytes));
        }
        Ok(())
    }
}
