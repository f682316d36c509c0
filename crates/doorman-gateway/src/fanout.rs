//! Fan-out engine: delivers the latest published frame to every subscriber,
//! superseding any delivery still in flight.
//!
//! Subscriptions and publishes all serialize through one arbitration task,
//! so the subscriber set is never read while being mutated and no lock is
//! needed. Each publish owns a cancellation token; the next publish cancels
//! it, abandoning per-subscriber sends of the now-stale frame. Subscribers
//! therefore never observe an older frame after a newer one, but may skip
//! frames entirely (latest-wins, no queueing).

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A frame together with the token of the publish that produced it. The
/// receive side drops frames whose publish was already superseded.
struct Frame {
    bytes: Bytes,
    generation: CancellationToken,
}

enum Command {
    Subscribe {
        reply: oneshot::Sender<(Uuid, mpsc::Receiver<Frame>)>,
    },
    Unsubscribe {
        id: Uuid,
    },
    Publish {
        bytes: Bytes,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the arbitration loop. Cheap to clone.
#[derive(Clone)]
pub struct Fanout {
    tx: mpsc::UnboundedSender<Command>,
}

impl Fanout {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Register a personal delivery channel.
    pub async fn subscribe(&self) -> Subscription {
        let (reply, response) = oneshot::channel();
        let _ = self.tx.send(Command::Subscribe { reply });
        // The arbitration loop lives as long as any handle does
        let (id, rx) = response.await.expect("fanout loop gone");
        Subscription {
            id,
            rx,
            tx: self.tx.clone(),
        }
    }

    /// Distribute a new frame to all current subscribers, cancelling
    /// deliveries of the previous frame that are still in flight.
    pub fn publish(&self, bytes: Bytes) {
        let _ = self.tx.send(Command::Publish { bytes });
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        let _ = self.tx.send(Command::Count { reply });
        response.await.expect("fanout loop gone")
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut subscribers: HashMap<Uuid, mpsc::Sender<Frame>> = HashMap::new();
    let mut generation = CancellationToken::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Subscribe { reply } => {
                let id = Uuid::new_v4();
                let (tx, sub_rx) = mpsc::channel(1);
                if reply.send((id, sub_rx)).is_ok() {
                    subscribers.insert(id, tx);
                }
            }
            Command::Unsubscribe { id } => {
                subscribers.remove(&id);
            }
            Command::Publish { bytes } => {
                // Supersede the previous publish before starting this one
                generation.cancel();
                generation = CancellationToken::new();

                for tx in subscribers.values() {
                    let tx = tx.clone();
                    let frame = Frame {
                        bytes: bytes.clone(),
                        generation: generation.clone(),
                    };
                    let cancelled = generation.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancelled.cancelled() => {}
                            _ = tx.send(frame) => {}
                        }
                    });
                }
            }
            Command::Count { reply } => {
                let _ = reply.send(subscribers.len());
            }
        }
    }
}

/// A registered subscriber's receive handle. Dropping it deregisters the
/// subscriber from the arbitration loop.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Frame>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Receive the next frame, skipping frames whose publish has already
    /// been superseded. Returns `None` once the fanout shuts down.
    pub async fn recv(&mut self) -> Option<Bytes> {
        while let Some(frame) = self.rx.recv().await {
            if frame.generation.is_cancelled() {
                continue;
            }
            return Some(frame.bytes);
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Unsubscribe { id: self.id });
    }
}
