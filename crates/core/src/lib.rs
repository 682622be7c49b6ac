//! Parley Core
//!
//! The agent-engine side of the relay: the hook slots an engine calls into,
//! a conversational engine that drives an LLM, and the LLM clients it can use.
//! Nothing in this crate knows about WebSockets.

pub mod chat_engine;
pub mod engine;
pub mod llm_client;
pub mod scripted;
