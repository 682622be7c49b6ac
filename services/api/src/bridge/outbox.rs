//! Outbound Delivery Queue
//!
//! An ordered, unbounded, single-consumer queue of UI events. Producers live
//! on the turn-loop thread and on the async side alike; all of them go
//! through [`Outbox::post`], which never blocks and is safe from any thread.

use crate::ws::protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, trace};

/// Producer half of a session's outbound queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Consumer half of a session's outbound queue.
///
/// The receiver sits behind an async mutex so that exactly one drain task
/// holds it at a time and the registry can reclaim it on reconnection.
#[derive(Clone, Debug)]
pub struct OutboxReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ServerMessage>>>,
}

/// Creates a connected outbox pair.
pub fn channel() -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Outbox { tx },
        OutboxReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl Outbox {
    /// Enqueues an event for delivery, preserving call order.
    ///
    /// Returns `false` if the receiving side is gone.
    pub fn post(&self, event: ServerMessage) -> bool {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(()) => {
                trace!(kind, "Queued outbound event");
                true
            }
            Err(_) => {
                debug!(kind, "Outbound queue closed; dropping event");
                false
            }
        }
    }
}

impl OutboxReceiver {
    /// Takes exclusive ownership of the queue for draining.
    pub async fn acquire(&self) -> OwnedMutexGuard<mpsc::UnboundedReceiver<ServerMessage>> {
        self.rx.clone().lock_owned().await
    }

    /// Drops every event that has not been delivered yet.
    ///
    /// Waits until no drain task holds the queue.
    pub async fn discard_pending(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded stale outbound events");
        }
        discarded
    }
}
