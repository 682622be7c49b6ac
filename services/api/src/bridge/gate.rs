//! Connection state and pause gate.
//!
//! The only state shared between the transport side and the turn-loop thread
//! besides the two queues. The turn loop parks here while the client is away
//! and resumes when a new connection is attached.

use crate::ws::protocol::ConnectionStatus;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identifies one physical WebSocket connection.
pub type ConnectionId = Uuid;

/// Outcome of waiting for the connection to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    Connected,
    /// The session is shutting down.
    Closed,
    TimedOut,
}

#[derive(Debug)]
struct GateState {
    status: ConnectionStatus,
    connection: Option<ConnectionId>,
    disconnected_at: Option<Instant>,
    closed: bool,
}

#[derive(Debug)]
pub struct ConnectionGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionGate {
    /// A gate with no connection attached yet.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                status: ConnectionStatus::Disconnected,
                connection: None,
                disconnected_at: Some(Instant::now()),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Whether `connection` is the one currently bound to the session.
    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.state.lock().connection == Some(connection)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// How long the session has been without a connection, if it is.
    pub fn disconnected_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        match state.status {
            ConnectionStatus::Connected => None,
            _ => state.disconnected_at.map(|at| at.elapsed()),
        }
    }

    /// Marks the session as being re-bound to a new connection.
    pub fn begin_reconnect(&self) {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Connected {
            state.status = ConnectionStatus::Reconnecting;
        }
    }

    /// Binds `connection` and releases anyone parked on the gate.
    pub fn connect(&self, connection: ConnectionId) {
        let mut state = self.state.lock();
        state.status = ConnectionStatus::Connected;
        state.connection = Some(connection);
        state.disconnected_at = None;
        self.changed.notify_all();
    }

    /// Marks the session disconnected, but only if `connection` is still the
    /// current one. Returns whether the state changed.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.lock();
        if state.connection != Some(connection) {
            return false;
        }
        state.connection = None;
        if state.status != ConnectionStatus::Disconnected {
            state.status = ConnectionStatus::Disconnected;
            state.disconnected_at = Some(Instant::now());
        }
        true
    }

    /// Permanently opens the gate so no waiter stays parked.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    /// Blocks the calling thread until the session is connected, the gate is
    /// closed, or `timeout` elapses.
    pub fn wait_until_connected(&self, timeout: Duration) -> GateWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return GateWait::Closed;
            }
            if state.status == ConnectionStatus::Connected {
                return GateWait::Connected;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match (state.closed, state.status) {
                    (true, _) => GateWait::Closed,
                    (false, ConnectionStatus::Connected) => GateWait::Connected,
                    _ => GateWait::TimedOut,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_gate_is_disconnected() {
        let gate = ConnectionGate::new();
        assert_eq!(gate.status(), ConnectionStatus::Disconnected);
        assert!(gate.disconnected_for().is_some());
    }

    #[test]
    fn test_connect_and_disconnect_current_connection() {
        let gate = ConnectionGate::new();
        let conn = Uuid::new_v4();
        gate.connect(conn);
        assert!(gate.is_connected());
        assert!(gate.is_current(conn));
        assert!(gate.disconnected_for().is_none());

        assert!(gate.disconnect(conn));
        assert_eq!(gate.status(), ConnectionStatus::Disconnected);
        assert!(!gate.is_current(conn));
    }

    #[test]
    fn test_stale_connection_cannot_disconnect() {
        let gate = ConnectionGate::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        gate.connect(old);
        gate.connect(new);

        assert!(!gate.disconnect(old));
        assert!(gate.is_connected());
        assert!(gate.is_current(new));
    }

    #[test]
    fn test_begin_reconnect_only_when_not_connected() {
        let gate = ConnectionGate::new();
        gate.begin_reconnect();
        assert_eq!(gate.status(), ConnectionStatus::Reconnecting);

        gate.connect(Uuid::new_v4());
        gate.begin_reconnect();
        assert_eq!(gate.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_wait_returns_immediately_when_connected() {
        let gate = ConnectionGate::new();
        gate.connect(Uuid::new_v4());
        assert_eq!(
            gate.wait_until_connected(Duration::from_secs(5)),
            GateWait::Connected
        );
    }

    #[test]
    fn test_wait_times_out() {
        let gate = ConnectionGate::new();
        assert_eq!(
            gate.wait_until_connected(Duration::from_millis(20)),
            GateWait::TimedOut
        );
    }

    #[test]
    fn test_connect_releases_waiter() {
        let gate = Arc::new(ConnectionGate::new());
        let waiter = gate.clone();
        let handle = std::thread::spawn(move || waiter.wait_until_connected(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(20));
        gate.connect(Uuid::new_v4());

        assert_eq!(handle.join().unwrap(), GateWait::Connected);
    }

    #[test]
    fn test_close_releases_waiter() {
        let gate = Arc::new(ConnectionGate::new());
        let waiter = gate.clone();
        let handle = std::thread::spawn(move || waiter.wait_until_connected(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(20));
        gate.close();

        assert_eq!(handle.join().unwrap(), GateWait::Closed);
        assert!(gate.is_closed());
    }
}
