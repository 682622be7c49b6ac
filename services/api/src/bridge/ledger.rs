//! Deduplication Ledger
//!
//! Tracks which finalized assistant texts were already delivered during the
//! current turn, so that overlapping engine notifications for the same
//! response reach the client once.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A short content hash: the first 16 hex digits of the SHA-256 of the
/// trimmed text.
pub type Fingerprint = String;

/// Computes the fingerprint of `content`, or `None` for blank text.
pub fn fingerprint(content: &str) -> Option<Fingerprint> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digest = format!("{:x}", Sha256::digest(trimmed.as_bytes()));
    Some(digest[..16].to_string())
}

#[derive(Debug, Default)]
pub struct DedupLedger {
    sent: Mutex<HashSet<Fingerprint>>,
    resets: AtomicU64,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `send` unless `content` is blank or was already delivered this
    /// turn, then records it. Check, send and mark happen under one lock.
    ///
    /// Returns whether `send` ran.
    pub fn deliver_once(&self, content: &str, send: impl FnOnce()) -> bool {
        let Some(print) = fingerprint(content) else {
            return false;
        };
        let mut sent = self.sent.lock();
        if sent.contains(&print) {
            debug!(fingerprint = %print, "Suppressing duplicate delivery");
            return false;
        }
        send();
        sent.insert(print);
        true
    }

    /// Records `content` as delivered without sending anything.
    pub fn mark(&self, content: &str) {
        if let Some(print) = fingerprint(content) {
            self.sent.lock().insert(print);
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, content: &str) -> bool {
        fingerprint(content).is_some_and(|print| self.sent.lock().contains(&print))
    }

    /// Forgets everything; called once at the start of every turn.
    pub fn reset(&self) {
        let mut sent = self.sent.lock();
        let cleared = sent.len();
        sent.clear();
        self.resets.fetch_add(1, Ordering::Relaxed);
        debug!(cleared, "Reset deduplication ledger for new turn");
    }

    /// How many times the ledger has been reset.
    #[cfg(test)]
    pub(crate) fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sent.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}
