//! Manages the WebSocket connection lifecycle for a chat session.

use super::protocol::ClientMessage;
use crate::state::AppState;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, field, info, instrument, warn};
use uuid::Uuid;

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Stable browser identity; reconnecting with the same value resumes
    /// the session.
    pub client_id: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let client_id = params.client_id.filter(|id| !id.trim().is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

/// Runs one connection: binds it to a session, then forwards client
/// messages until the socket closes or is superseded by a newer one.
#[instrument(name = "ws_connection", skip_all, fields(connection, session_id, client_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: Option<String>) {
    let connection = Uuid::new_v4();
    let span = tracing::Span::current();
    span.record("connection", field::display(connection));
    if let Some(client) = &client_id {
        span.record("client_id", client.as_str());
    }
    info!("New WebSocket connection");

    let (socket_tx, mut socket_rx) = socket.split();

    let (session, is_new) = match state
        .registry
        .create_or_get(client_id.as_deref(), connection, socket_tx)
        .await
    {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "Failed to bind connection to a session");
            return;
        }
    };
    span.record("session_id", field::display(session.id()));
    info!(is_new, "Connection bound to session");

    while let Some(frame) = socket_rx.next().await {
        if !session.is_current(connection) {
            info!("Connection superseded by a newer one; closing");
            break;
        }
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("Client closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => {
                debug!(?message, "Received client message");
                session.handle_client_message(message).await;
            }
            Err(e) => warn!(error = %e, "Ignoring malformed client message"),
        }
    }

    state.registry.release(session.id(), connection).await;
    info!("WebSocket connection finished");
}
