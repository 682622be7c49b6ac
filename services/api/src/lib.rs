//! Parley API Library Crate
//!
//! This library contains the web service side of the chat relay: the
//! session/callback bridge between blocking agent engines and browser
//! WebSocket clients, the session registry, the HTTP handlers and routing.
//! The `parley` binary is a thin wrapper around this library.

pub mod bridge;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;
