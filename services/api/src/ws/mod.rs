//! WebSocket Transport
//!
//! - `protocol`: the JSON message format between browser and relay.
//! - `handler`: the connection lifecycle, from upgrade to release.

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
