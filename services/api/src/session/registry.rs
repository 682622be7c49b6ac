//! Session Registry
//!
//! Maps client identities to live sessions so that a reconnecting browser is
//! rebound to its existing session instead of getting a new one.

use super::{Session, SessionError, SessionSettings};
use crate::{
    bridge::{ConnectionId, EventSink},
    models::SessionSummary,
    ws::protocol::ConnectionStatus,
};
use futures_util::future::join_all;
use parley_core::engine::EngineFactory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<Uuid, Arc<Session>>,
    clients: HashMap<String, Uuid>,
}

pub struct SessionRegistry {
    factory: Arc<dyn EngineFactory>,
    settings: SessionSettings,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Binds `connection` to the session registered for `client_id`, or to a
    /// new session. Returns the session and whether it was created.
    ///
    /// A matching session keeps its id and its turn loop; one whose loop has
    /// stopped is given a fresh engine.
    pub async fn create_or_get<S>(
        &self,
        client_id: Option<&str>,
        connection: ConnectionId,
        sink: S,
    ) -> Result<(Arc<Session>, bool), SessionError>
    where
        S: EventSink + 'static,
    {
        let mut inner = self.inner.lock().await;
        let existing = client_id
            .and_then(|client| inner.clients.get(client))
            .and_then(|id| inner.sessions.get(id))
            .cloned();

        if let Some(session) = existing {
            drop(inner);
            session.attach(connection, sink, true).await;
            if !session.is_running() {
                info!(session_id = %session.id(), "Restarting stopped session on reconnection");
                session.start()?;
            }
            info!(session_id = %session.id(), client_id, "Client rejoined session");
            return Ok((session, false));
        }

        let session = Arc::new(Session::new(
            client_id.map(str::to_owned),
            self.factory.clone(),
            self.settings,
        ));
        let session_id = session.id();
        inner.sessions.insert(session_id, session.clone());
        if let Some(client) = client_id {
            inner.clients.insert(client.to_owned(), session_id);
        }
        let total = inner.sessions.len();
        drop(inner);

        session.attach(connection, sink, false).await;
        if let Err(e) = session.start() {
            self.remove(session_id).await;
            return Err(e);
        }
        info!(%session_id, client_id, total, "Created session");
        Ok((session, true))
    }

    /// Called when `connection` closes. Anonymous sessions are removed;
    /// identified ones wait for their client to come back.
    pub async fn release(&self, session_id: Uuid, connection: ConnectionId) {
        let Some(session) = self.get(session_id).await else {
            return;
        };
        let detached = session.detach(connection).await;
        if session.client_id().is_some() {
            if detached {
                info!(%session_id, "Session kept for reconnection");
            }
            return;
        }
        // A failed send may already have unbound the connection.
        if detached || session.status() != ConnectionStatus::Connected {
            self.remove(session_id).await;
        }
    }

    /// Unregisters a session and shuts it down.
    pub async fn remove(&self, session_id: Uuid) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            let removed = inner.sessions.remove(&session_id);
            if let Some(client) = removed.as_ref().and_then(|s| s.client_id()) {
                if inner.clients.get(client) == Some(&session_id) {
                    inner.clients.remove(client);
                }
            }
            removed
        };

        match removed {
            Some(session) => {
                session.shutdown().await;
                info!(%session_id, "Removed session");
                true
            }
            None => false,
        }
    }

    /// Removes sessions that have had no client for longer than
    /// `idle_timeout`. Returns how many were removed.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let idle: Vec<Uuid> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .values()
                .filter(|s| s.disconnected_for().is_some_and(|d| d >= idle_timeout))
                .map(|s| s.id())
                .collect()
        };

        let mut reaped = 0;
        for session_id in idle {
            if self.remove(session_id).await {
                reaped += 1;
            }
        }
        if reaped > 0 {
            warn!(reaped, "Reaped idle sessions");
        }
        reaped
    }

    /// Shuts every session down concurrently.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().await;
            inner.clients.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        let count = sessions.len();
        join_all(sessions.iter().map(|s| s.shutdown())).await;
        info!(count, "All sessions shut down");
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.inner.lock().await.sessions.get(&session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Summaries of all sessions, oldest first.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = {
            let inner = self.inner.lock().await;
            inner.sessions.values().map(|s| s.summary()).collect()
        };
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }
}
