//! Session/Callback Bridge
//!
//! Connects a blocking agent engine running on its own thread to the async
//! WebSocket side. The two halves share only:
//!
//! - `outbox`: ordered UI events flowing to the client.
//! - `inbox`: user input flowing to the engine.
//! - `gate`: connection state and the pause gate the engine parks on.
//!
//! `hooks` implements the engine's callback slots on top of these, with
//! `stream` framing token streams and `ledger` suppressing duplicate
//! deliveries. `runner` owns the worker thread; `sink` drains the outbox.

pub mod gate;
pub mod hooks;
pub mod inbox;
pub mod ledger;
pub mod outbox;
pub mod runner;
pub mod sink;
pub mod stream;

pub use gate::{ConnectionGate, ConnectionId};
pub use hooks::{SessionHooks, WaitLimits};
pub use inbox::{Inbound, Inbox};
pub use outbox::{Outbox, OutboxReceiver};
pub use runner::{StopOutcome, TurnLoop, TurnLoopError};
pub use sink::{EventSink, spawn_drain};
