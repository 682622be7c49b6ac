//! Stream Reconstructor
//!
//! Turns the engine's token callbacks into `stream_start`, `stream_token`...
//! and a closing `stream_end` or `stream_cancel`. It only frames streams; it
//! never sends the finalized text as a whole message.

use super::{ledger::DedupLedger, outbox::Outbox};
use crate::ws::protocol::{Sender, ServerMessage};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct StreamState {
    stream_id: Uuid,
    tokens: Vec<String>,
}

/// How a stream was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClose {
    /// Tokens were shown; `stream_end` was sent.
    Ended(Uuid),
    /// Nothing was shown; `stream_cancel` was sent.
    Cancelled(Uuid),
    /// There was no open stream.
    NotStreaming,
}

pub struct StreamReconstructor {
    outbox: Outbox,
    ledger: Arc<DedupLedger>,
    current: Mutex<Option<StreamState>>,
}

impl StreamReconstructor {
    pub fn new(outbox: Outbox, ledger: Arc<DedupLedger>) -> Self {
        Self {
            outbox,
            ledger,
            current: Mutex::new(None),
        }
    }

    /// Opens a new stream and announces it. An unclosed previous stream is
    /// closed first.
    pub fn start(&self) -> Uuid {
        if self.is_streaming() {
            warn!("Stream started while another was open; closing the previous one");
            self.close(None);
        }

        let stream_id = Uuid::new_v4();
        *self.current.lock() = Some(StreamState {
            stream_id,
            tokens: Vec::new(),
        });
        self.outbox.post(ServerMessage::StreamStart {
            message_id: stream_id,
            sender: Sender::Assistant,
            timestamp: Utc::now(),
        });
        debug!(%stream_id, "Stream started");
        stream_id
    }

    /// Appends a fragment and forwards it. Fragments arriving outside a
    /// stream are dropped.
    pub fn token(&self, fragment: &str) {
        let mut current = self.current.lock();
        let Some(state) = current.as_mut() else {
            warn!("Token received with no open stream; dropping it");
            return;
        };
        state.tokens.push(fragment.to_string());
        // Posting under the lock keeps tokens in arrival order.
        self.outbox.post(ServerMessage::StreamToken {
            message_id: state.stream_id,
            token: fragment.to_string(),
        });
    }

    /// Closes the open stream with the engine's finalized text.
    pub fn finish(&self, final_content: &str) -> StreamClose {
        self.close(Some(final_content))
    }

    /// Closes the open stream without finalized text.
    pub fn cancel(&self) -> StreamClose {
        self.close(None)
    }

    pub fn is_streaming(&self) -> bool {
        self.current.lock().is_some()
    }

    fn close(&self, final_content: Option<&str>) -> StreamClose {
        let Some(state) = self.current.lock().take() else {
            debug!("Stream close requested with no open stream");
            return StreamClose::NotStreaming;
        };

        let stream_id = state.stream_id;
        if state.tokens.is_empty() {
            self.outbox.post(ServerMessage::StreamCancel {
                message_id: stream_id,
            });
            debug!(%stream_id, "Stream produced no tokens; cancelled");
            return StreamClose::Cancelled(stream_id);
        }

        self.outbox.post(ServerMessage::StreamEnd {
            message_id: stream_id,
        });

        // The client already holds this text; a later complete message
        // with the same content would duplicate it.
        let streamed = state.tokens.concat();
        self.ledger.mark(&streamed);
        if let Some(content) = final_content {
            self.ledger.mark(content);
        }
        debug!(%stream_id, tokens = state.tokens.len(), "Stream ended");
        StreamClose::Ended(stream_id)
    }
}
