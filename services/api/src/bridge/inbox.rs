//! Inbound Input Channel
//!
//! Carries user input from the transport side to the turn-loop thread, which
//! consumes it with a real, bounded blocking wait.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::time::Duration;
use tracing::debug;

/// One item of inbound input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text submitted by the user.
    Message(String),
    /// Ask the engine to forget the conversation so far.
    ClearHistory,
    /// Sentinel that releases a parked turn loop so it can stop.
    Shutdown,
}

/// Result of waiting on the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Item(Inbound),
    TimedOut,
    Closed,
}

/// Both ends of a session's inbound channel. Cheap to clone; clones share
/// the same queue.
#[derive(Clone, Debug)]
pub struct Inbox {
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueues an item. Never blocks.
    pub fn push(&self, item: Inbound) {
        // The inbox owns a receiver, so the channel cannot be disconnected.
        let _ = self.tx.send(item);
    }

    /// Blocks the calling thread until an item arrives or `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Received::Item(item),
            Err(RecvTimeoutError::Timeout) => Received::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Drops queued user input. A pending `Shutdown` survives so that a
    /// stopping turn loop is still released.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        let mut keep_shutdown = false;
        while let Ok(item) = self.rx.try_recv() {
            match item {
                Inbound::Shutdown => keep_shutdown = true,
                _ => discarded += 1,
            }
        }
        if keep_shutdown {
            self.push(Inbound::Shutdown);
        }
        if discarded > 0 {
            debug!(discarded, "Discarded stale inbound input");
        }
        discarded
    }

    /// Drops everything queued, including a leftover `Shutdown`.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        while self.rx.try_recv().is_ok() {
            cleared += 1;
        }
        cleared
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
