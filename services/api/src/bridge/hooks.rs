//! The per-session implementation of the engine's hook slots.
//!
//! `SessionHooks` is the one object an engine talks to. It owns no thread of
//! its own: every method runs on the turn-loop thread and hands results to
//! the async side through the session's outbox.

use super::{
    gate::{ConnectionGate, GateWait},
    inbox::{Inbound, Inbox, Received},
    ledger::DedupLedger,
    outbox::Outbox,
    stream::StreamReconstructor,
};
use crate::ws::protocol::{Sender, ServerMessage};
use parley_core::engine::{EngineHooks, TokenSink, UserInput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Time limits applied while the engine waits on the user.
#[derive(Debug, Clone, Copy)]
pub struct WaitLimits {
    /// How long to wait for the user to type something.
    pub input_timeout: Duration,
    /// How long to wait for a dropped client to reconnect.
    pub reconnect_timeout: Duration,
}

impl Default for WaitLimits {
    fn default() -> Self {
        Self {
            input_timeout: Duration::from_secs(300),
            reconnect_timeout: Duration::from_secs(300),
        }
    }
}

pub struct SessionHooks {
    session_id: Uuid,
    outbox: Outbox,
    inbox: Inbox,
    gate: Arc<ConnectionGate>,
    ledger: Arc<DedupLedger>,
    stream: StreamReconstructor,
    waiting_for_user: AtomicBool,
    limits: WaitLimits,
}

impl SessionHooks {
    pub fn new(
        session_id: Uuid,
        outbox: Outbox,
        inbox: Inbox,
        gate: Arc<ConnectionGate>,
        limits: WaitLimits,
    ) -> Self {
        let ledger = Arc::new(DedupLedger::new());
        Self {
            session_id,
            stream: StreamReconstructor::new(outbox.clone(), ledger.clone()),
            outbox,
            inbox,
            gate,
            ledger,
            waiting_for_user: AtomicBool::new(false),
            limits,
        }
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.waiting_for_user.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Posts an event to the client from any thread.
    pub fn post(&self, event: ServerMessage) -> bool {
        self.outbox.post(event)
    }

    /// Sends a finalized assistant response unless it was already delivered
    /// this turn.
    fn deliver_response(&self, content: &str, path: &'static str) {
        let sent = self.ledger.deliver_once(content, || {
            self.outbox
                .post(ServerMessage::complete(content, Sender::Assistant));
        });
        if sent {
            debug!(session_id = %self.session_id, path, "Delivered assistant response");
        }
    }

    fn wait_for_input(&self) -> UserInput {
        if !self.gate.is_connected() {
            info!(session_id = %self.session_id, "Client away; pausing until it reconnects");
            match self
                .gate
                .wait_until_connected(self.limits.reconnect_timeout)
            {
                GateWait::Connected => {
                    info!(session_id = %self.session_id, "Client reconnected; resuming")
                }
                GateWait::Closed => return UserInput::Terminate,
                GateWait::TimedOut => {
                    warn!(session_id = %self.session_id, "Client did not reconnect in time");
                    return UserInput::Terminate;
                }
            }
        }

        match self.inbox.recv_timeout(self.limits.input_timeout) {
            Received::Item(Inbound::Message(text)) => UserInput::Text(text),
            Received::Item(Inbound::ClearHistory) => UserInput::ClearHistory,
            Received::Item(Inbound::Shutdown) => {
                debug!(session_id = %self.session_id, "Shutdown sentinel received");
                UserInput::Terminate
            }
            Received::TimedOut => {
                error!(
                    session_id = %self.session_id,
                    timeout_secs = self.limits.input_timeout.as_secs(),
                    "Timed out waiting for user input"
                );
                UserInput::Terminate
            }
            Received::Closed => UserInput::Terminate,
        }
    }
}

impl EngineHooks for SessionHooks {
    fn start_turn(&self) {
        self.ledger.reset();
    }

    fn user_response(&self, prompt: Option<&str>) -> UserInput {
        if self.gate.is_closed() {
            return UserInput::Terminate;
        }
        debug!(session_id = %self.session_id, ?prompt, "Engine is waiting for user input");
        self.waiting_for_user.store(true, Ordering::SeqCst);
        let input = self.wait_for_input();
        self.waiting_for_user.store(false, Ordering::SeqCst);
        input
    }

    fn start_stream(&self) -> TokenSink<'_> {
        self.stream.start();
        Box::new(move |token: &str| self.stream.token(token))
    }

    fn finish_stream(&self, content: &str) {
        self.stream.finish(content);
    }

    fn cancel_stream(&self) {
        self.stream.cancel();
    }

    fn llm_response(&self, content: &str, _cached: bool) {
        self.deliver_response(content, "primary");
    }

    fn show_llm_response(&self, content: &str, _cached: bool) {
        self.deliver_response(content, "secondary");
    }

    fn show_error(&self, message: &str) {
        self.outbox.post(ServerMessage::error(message));
    }
}
