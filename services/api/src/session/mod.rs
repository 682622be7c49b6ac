//! Sessions
//!
//! A [`Session`] is the per-client unit of state that survives reconnection:
//! its queues, its connection gate and its turn loop live as long as the
//! session, while WebSocket connections come and go. The [`registry`] maps
//! client identities to sessions.

pub mod registry;

pub use registry::SessionRegistry;

use crate::{
    bridge::{
        ConnectionGate, ConnectionId, EventSink, Inbound, Inbox, Outbox, OutboxReceiver,
        SessionHooks, StopOutcome, TurnLoop, TurnLoopError, WaitLimits, outbox, spawn_drain,
    },
    models::SessionSummary,
    ws::protocol::{ClientMessage, Command, ConnectionStatus, Sender, ServerMessage},
};
use chrono::{DateTime, Utc};
use parley_core::engine::EngineFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected to the session")]
    NotConnected,
    #[error("The session is stopped; send a reset command to start over")]
    Stopped,
    #[error("Message content is empty")]
    EmptyMessage,
    #[error(transparent)]
    TurnLoop(#[from] TurnLoopError),
}

/// Per-session timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub limits: WaitLimits,
    /// Bound on waiting for a stopping turn-loop thread.
    pub join_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            limits: WaitLimits::default(),
            join_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Session {
    id: Uuid,
    client_id: Option<String>,
    created_at: DateTime<Utc>,
    outbox: Outbox,
    outbox_rx: OutboxReceiver,
    inbox: Inbox,
    gate: Arc<ConnectionGate>,
    hooks: Arc<SessionHooks>,
    runner: TurnLoop,
    drain: Mutex<Option<JoinHandle<()>>>,
    factory: Arc<dyn EngineFactory>,
    join_timeout: Duration,
}

impl Session {
    pub fn new(
        client_id: Option<String>,
        factory: Arc<dyn EngineFactory>,
        settings: SessionSettings,
    ) -> Self {
        let id = Uuid::new_v4();
        let (outbox, outbox_rx) = outbox::channel();
        let inbox = Inbox::new();
        let gate = Arc::new(ConnectionGate::new());
        let hooks = Arc::new(SessionHooks::new(
            id,
            outbox.clone(),
            inbox.clone(),
            gate.clone(),
            settings.limits,
        ));
        Self {
            id,
            client_id,
            created_at: Utc::now(),
            outbox,
            outbox_rx,
            inbox,
            gate,
            hooks,
            runner: TurnLoop::new(id),
            drain: Mutex::new(None),
            factory,
            join_timeout: settings.join_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.gate.status()
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.hooks.is_waiting_for_user()
    }

    /// How long the session has been without a client, if it is.
    pub fn disconnected_for(&self) -> Option<Duration> {
        self.gate.disconnected_for()
    }

    /// Binds a new connection to the session.
    ///
    /// Any previous drain task is cancelled and input or events that piled
    /// up while no client was attached are dropped. A turn loop parked on
    /// the pause gate resumes.
    pub async fn attach<S>(&self, connection: ConnectionId, sink: S, resumed: bool)
    where
        S: EventSink + 'static,
    {
        self.gate.begin_reconnect();

        let mut drain = self.drain.lock().await;
        if let Some(previous) = drain.take() {
            previous.abort();
            let _ = previous.await;
        }

        let stale_inbound = self.inbox.discard_pending();
        let stale_outbound = self.outbox_rx.discard_pending().await;
        if stale_inbound + stale_outbound > 0 {
            debug!(session_id = %self.id, stale_inbound, stale_outbound, "Cleared stale queue entries");
        }

        self.gate.connect(connection);
        let message = if resumed {
            "Reconnected to existing session"
        } else {
            "Connected to chat session"
        };
        self.outbox.post(ServerMessage::ConnectionStatus {
            status: ConnectionStatus::Connected,
            session_id: self.id,
            message: Some(message.to_string()),
        });
        *drain = Some(spawn_drain(
            self.outbox_rx.clone(),
            sink,
            self.gate.clone(),
            connection,
        ));
        info!(session_id = %self.id, %connection, resumed, "Connection attached");
    }

    /// Unbinds `connection` if it is still the current one. Returns whether
    /// it was.
    pub async fn detach(&self, connection: ConnectionId) -> bool {
        if !self.gate.disconnect(connection) {
            debug!(session_id = %self.id, %connection, "Ignoring detach of superseded connection");
            return false;
        }
        if let Some(task) = self.drain.lock().await.take() {
            task.abort();
        }
        info!(session_id = %self.id, %connection, "Connection detached");
        true
    }

    /// Whether `connection` is the one currently bound.
    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.gate.is_current(connection)
    }

    /// Starts a turn loop with a fresh engine.
    pub fn start(&self) -> Result<(), SessionError> {
        if self.runner.is_running() {
            return Err(TurnLoopError::AlreadyRunning.into());
        }
        // Leftovers belong to a previous loop.
        self.inbox.clear();
        let engine = self.factory.create(&self.id.to_string());
        self.runner.start(engine, self.hooks.clone())?;
        Ok(())
    }

    /// Stops the turn loop. The session stays registered.
    pub async fn stop(&self) -> StopOutcome {
        self.runner.stop(&self.inbox, self.join_timeout).await
    }

    /// Replaces the turn loop with one driving a fresh engine.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.stop().await;
        self.start()
    }

    /// Queues user text for the turn loop.
    pub fn submit(&self, text: String) -> Result<(), SessionError> {
        if !self.gate.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if !self.runner.is_running() {
            return Err(SessionError::Stopped);
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.inbox.push(Inbound::Message(text));
        Ok(())
    }

    /// Applies one decoded client message.
    pub async fn handle_client_message(&self, message: ClientMessage) {
        match message {
            ClientMessage::Message { content, .. } => {
                if let Err(e) = self.submit(content) {
                    warn!(session_id = %self.id, error = %e, "Rejected user message");
                    self.outbox.post(ServerMessage::error(e.to_string()));
                }
            }
            ClientMessage::Ping => {
                self.outbox.post(ServerMessage::Pong);
            }
            ClientMessage::Command { command } => self.handle_command(command).await,
            ClientMessage::Unknown => {
                warn!(session_id = %self.id, "Ignoring message of unknown type");
            }
        }
    }

    async fn handle_command(&self, command: Command) {
        info!(session_id = %self.id, ?command, "Handling command");
        match command {
            Command::Stop => {
                self.stop().await;
                self.post_system("Session stopped.");
            }
            Command::Reset => match self.reset().await {
                Ok(()) => self.post_system("Session reset. Starting a new conversation."),
                Err(e) => {
                    error!(session_id = %self.id, error = %e, "Failed to reset session");
                    self.outbox
                        .post(ServerMessage::error(format!("Failed to reset session: {e}")));
                }
            },
            Command::Clear => {
                if self.runner.is_running() {
                    self.inbox.push(Inbound::ClearHistory);
                }
                self.post_system("Chat history cleared.");
            }
        }
    }

    fn post_system(&self, text: &str) {
        self.outbox.post(ServerMessage::complete(text, Sender::System));
    }

    /// Stops everything the session owns. Waits for the turn loop only up
    /// to the join timeout.
    pub async fn shutdown(&self) {
        self.gate.close();
        let outcome = self.stop().await;
        if let Some(task) = self.drain.lock().await.take() {
            task.abort();
        }
        info!(session_id = %self.id, ?outcome, "Session shut down");
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            client_id: self.client_id.clone(),
            status: self.status(),
            running: self.is_running(),
            waiting_for_user: self.is_waiting_for_user(),
            created_at: self.created_at,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Releases a turn loop that outlives its session.
        self.gate.close();
        if self.runner.is_running() {
            self.inbox.push(Inbound::Shutdown);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::scripted_factory;
    use super::*;
    use crate::bridge::sink::testing::ChannelSink;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    async fn next_event(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Reads events until a complete message or a stream end arrives and
    /// returns the kinds seen.
    async fn collect_turn(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = matches!(
                event,
                ServerMessage::CompleteMessage { .. }
                    | ServerMessage::StreamEnd { .. }
                    | ServerMessage::StreamCancel { .. }
                    | ServerMessage::Error { .. }
            );
            events.push(event);
            if done {
                return events;
            }
        }
    }

    async fn connected_session(
        stream: bool,
        settings: SessionSettings,
    ) -> (Session, ConnectionId, UnboundedReceiver<ServerMessage>) {
        let session = Session::new(None, scripted_factory(stream), settings);
        let conn = Uuid::new_v4();
        let (sink, mut rx) = ChannelSink::new();
        session.attach(conn, sink, false).await;
        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::ConnectionStatus {
                status: ConnectionStatus::Connected,
                ..
            }
        ));
        (session, conn, rx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_message_produces_single_complete_response() {
        let (session, _conn, mut rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();
        wait_for(|| session.is_waiting_for_user()).await;

        session.submit("hello".into()).unwrap();
        let events = collect_turn(&mut rx).await;
        match events.as_slice() {
            [ServerMessage::CompleteMessage { content, sender, .. }] => {
                assert_eq!(*sender, Sender::Assistant);
                assert!(content.starts_with("Hello!"));
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // Both response hooks fired; nothing else may follow.
        session.handle_client_message(ClientMessage::Ping).await;
        assert_eq!(next_event(&mut rx).await, ServerMessage::Pong);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streamed_response_is_framed_without_duplicate() {
        let (session, _conn, mut rx) = connected_session(true, SessionSettings::default()).await;
        session.start().unwrap();
        wait_for(|| session.is_waiting_for_user()).await;

        session.submit("hello".into()).unwrap();
        let events = collect_turn(&mut rx).await;
        assert_eq!(events.first().map(ServerMessage::kind), Some("stream_start"));
        assert_eq!(events.last().map(ServerMessage::kind), Some("stream_end"));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::StreamToken { token, .. } => Some(token.as_str()),
                _ => None,
            })
            .collect();
        assert!(text.starts_with("Hello!"));

        session.handle_client_message(ClientMessage::Ping).await;
        assert_eq!(next_event(&mut rx).await, ServerMessage::Pong);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_messages_are_answered_in_order() {
        let (session, _conn, mut rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();

        session.submit("hello".into()).unwrap();
        session.submit("help".into()).unwrap();

        let first = collect_turn(&mut rx).await;
        let second = collect_turn(&mut rx).await;
        let contents: Vec<String> = first
            .into_iter()
            .chain(second)
            .filter_map(|e| match e {
                ServerMessage::CompleteMessage { content, .. } => Some(content),
                _ => None,
            })
            .collect();
        assert!(contents[0].starts_with("Hello!"));
        assert!(contents[1].contains("help"));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_input_timeout_stops_session() {
        let settings = SessionSettings {
            limits: WaitLimits {
                input_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let (session, _conn, mut rx) = connected_session(false, settings).await;
        session.start().unwrap();
        wait_for(|| !session.is_running()).await;

        assert!(matches!(
            session.submit("anyone there?".into()),
            Err(SessionError::Stopped)
        ));
        session
            .handle_client_message(ClientMessage::Message {
                content: "hello".into(),
                message_id: None,
            })
            .await;
        assert!(matches!(next_event(&mut rx).await, ServerMessage::Error { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_requires_connection() {
        let (session, conn, _rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();
        assert!(session.detach(conn).await);

        assert!(matches!(
            session.submit("hello".into()),
            Err(SessionError::NotConnected)
        ));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reattach_resumes_the_same_turn_loop() {
        let (session, conn, _rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();
        wait_for(|| session.is_waiting_for_user()).await;

        assert!(session.detach(conn).await);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        let (sink, mut rx) = ChannelSink::new();
        session.attach(Uuid::new_v4(), sink, true).await;
        match next_event(&mut rx).await {
            ServerMessage::ConnectionStatus {
                session_id,
                message,
                ..
            } => {
                assert_eq!(session_id, session.id());
                assert_eq!(message.as_deref(), Some("Reconnected to existing session"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(session.is_running());

        session.submit("hello".into()).unwrap();
        let events = collect_turn(&mut rx).await;
        assert!(matches!(events[0], ServerMessage::CompleteMessage { .. }));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_detach_is_ignored() {
        let (session, old, _rx) = connected_session(false, SessionSettings::default()).await;
        let (sink, _rx2) = ChannelSink::new();
        let new = Uuid::new_v4();
        session.attach(new, sink, true).await;

        assert!(!session.detach(old).await);
        assert!(session.is_current(new));
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_and_reset_commands() {
        let (session, _conn, mut rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();

        session
            .handle_client_message(ClientMessage::Command {
                command: Command::Stop,
            })
            .await;
        assert!(!session.is_running());
        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::CompleteMessage {
                sender: Sender::System,
                ..
            }
        ));

        session
            .handle_client_message(ClientMessage::Command {
                command: Command::Reset,
            })
            .await;
        assert!(session.is_running());
        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::CompleteMessage {
                sender: Sender::System,
                ..
            }
        ));

        session.submit("test".into()).unwrap();
        let events = collect_turn(&mut rx).await;
        assert!(matches!(events[0], ServerMessage::CompleteMessage { sender: Sender::Assistant, .. }));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_command_posts_system_message() {
        let (session, _conn, mut rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();
        session
            .handle_client_message(ClientMessage::Command {
                command: Command::Clear,
            })
            .await;

        match next_event(&mut rx).await {
            ServerMessage::CompleteMessage {
                content, sender, ..
            } => {
                assert_eq!(sender, Sender::System);
                assert_eq!(content, "Chat history cleared.");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(session.is_running());
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_releases_loop_parked_on_gate() {
        let (session, conn, _rx) = connected_session(false, SessionSettings::default()).await;
        session.start().unwrap();
        wait_for(|| session.is_waiting_for_user()).await;
        session.detach(conn).await;

        session.shutdown().await;
        assert!(!session.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_message_is_ignored() {
        let (session, _conn, mut rx) = connected_session(false, SessionSettings::default()).await;
        session.handle_client_message(ClientMessage::Unknown).await;
        session.handle_client_message(ClientMessage::Ping).await;
        assert_eq!(next_event(&mut rx).await, ServerMessage::Pong);
    }
}
