//! Defines the WebSocket message protocol between the browser client and the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session control commands a client may issue.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Stop the session's turn loop.
    Stop,
    /// Restart the session with a fresh engine.
    Reset,
    /// Forget the conversation history.
    Clear,
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A text message from the user to the agent.
    #[serde(alias = "user_input")]
    Message {
        content: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    /// A session control command.
    Command { command: Command },
    /// Keep-alive probe; answered with `pong`.
    Ping,
    /// Any message type this server does not understand.
    #[serde(other)]
    Unknown,
}

/// The author of a chat message as shown in the UI.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    System,
}

/// The client-visible state of a session's connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reports the state of the connection to the session.
    ConnectionStatus {
        status: ConnectionStatus,
        session_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Signals the beginning of a streamed response.
    StreamStart {
        message_id: Uuid,
        sender: Sender,
        timestamp: DateTime<Utc>,
    },
    /// One token of a streamed response.
    StreamToken { message_id: Uuid, token: String },
    /// Signals the end of a streamed response that produced tokens.
    StreamEnd { message_id: Uuid },
    /// Withdraws a stream that produced no tokens; the placeholder bubble
    /// should be discarded.
    StreamCancel { message_id: Uuid },
    /// A whole, non-streamed message.
    CompleteMessage {
        id: Uuid,
        content: String,
        sender: Sender,
        timestamp: DateTime<Utc>,
    },
    /// A human-readable error.
    Error { message: String },
    /// Reply to a client `ping`.
    Pong,
}

impl ServerMessage {
    /// Builds a `complete_message` with a fresh id and the current time.
    pub fn complete(content: impl Into<String>, sender: Sender) -> Self {
        ServerMessage::CompleteMessage {
            id: Uuid::new_v4(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionStatus { .. } => "connection_status",
            ServerMessage::StreamStart { .. } => "stream_start",
            ServerMessage::StreamToken { .. } => "stream_token",
            ServerMessage::StreamEnd { .. } => "stream_end",
            ServerMessage::StreamCancel { .. } => "stream_cancel",
            ServerMessage::CompleteMessage { .. } => "complete_message",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
        }
    }
}
