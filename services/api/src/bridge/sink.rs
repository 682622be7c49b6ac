//! Delivery of queued events to the currently bound client.

use super::{
    gate::{ConnectionGate, ConnectionId},
    outbox::OutboxReceiver,
};
use crate::ws::protocol::ServerMessage;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, stream::SplitSink};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Anything events can be written to.
#[async_trait]
pub trait EventSink: Send {
    async fn send_event(&mut self, event: &ServerMessage) -> Result<()>;
}

#[async_trait]
impl EventSink for SplitSink<WebSocket, Message> {
    async fn send_event(&mut self, event: &ServerMessage) -> Result<()> {
        let serialized = serde_json::to_string(event)?;
        self.send(Message::Text(serialized.into())).await?;
        Ok(())
    }
}

/// Spawns the task that forwards queued events to `sink` for as long as
/// `connection` stays bound to the session.
///
/// A failed send marks the connection as gone; the event that failed is
/// lost, later events stay queued for the next connection.
pub fn spawn_drain<S>(
    receiver: OutboxReceiver,
    mut sink: S,
    gate: Arc<ConnectionGate>,
    connection: ConnectionId,
) -> JoinHandle<()>
where
    S: EventSink + 'static,
{
    tokio::spawn(async move {
        let mut rx = receiver.acquire().await;
        debug!(%connection, "Drain task attached");
        while let Some(event) = rx.recv().await {
            if !gate.is_current(connection) {
                debug!(%connection, kind = event.kind(), "Connection superseded; stopping drain");
                break;
            }
            if let Err(e) = sink.send_event(&event).await {
                warn!(%connection, kind = event.kind(), error = %e, "Failed to deliver event");
                gate.disconnect(connection);
                break;
            }
        }
        debug!(%connection, "Drain task finished");
    })
}
