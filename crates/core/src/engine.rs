//! Agent Engine Contract
//!
//! An engine runs a blocking, interactive request/response loop. Instead of
//! patching the engine's methods, the relay hands it an [`EngineHooks`]
//! implementation: a fixed set of named slots the engine calls whenever it
//! needs input or has output to show.

use serde::{Deserialize, Serialize};

/// Handler for the incremental tokens of one stream.
///
/// Returned by [`EngineHooks::start_stream`] and fed each fragment in the
/// order the model produced it.
pub type TokenSink<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// What the engine receives when it asks for user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// Text typed by the user.
    Text(String),
    /// The user asked for the conversation history to be forgotten.
    ClearHistory,
    /// No further input will arrive; the engine should wind down.
    Terminate,
}

/// How an engine run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The engine received the terminal input sentinel.
    Terminated,
    /// The engine decided the conversation was over.
    Completed(String),
}

/// Callback slots an engine invokes during a run.
///
/// Every method is called from the engine's own (blocking) thread.
/// Implementations must tolerate the same logical response being reported
/// through more than one of the response slots.
pub trait EngineHooks: Send + Sync {
    /// A new turn is starting; the engine is about to produce a response.
    fn start_turn(&self);

    /// Blocks until the user supplies input, or returns [`UserInput::Terminate`].
    fn user_response(&self, prompt: Option<&str>) -> UserInput;

    /// Opens a token stream and returns the handler for its fragments.
    fn start_stream(&self) -> TokenSink<'_>;

    /// Closes the current stream with the finalized response text.
    fn finish_stream(&self, content: &str);

    /// Abandons the current stream, e.g. because a cached answer was found.
    fn cancel_stream(&self);

    /// Primary notification that a response has been finalized.
    fn llm_response(&self, content: &str, cached: bool);

    /// Secondary display notification for a finalized response.
    fn show_llm_response(&self, content: &str, cached: bool);

    /// Reports a non-fatal error to the user.
    fn show_error(&self, message: &str);
}

/// A blocking conversational engine.
pub trait AgentEngine: Send {
    /// Runs the turn loop until it terminates or fails.
    fn run(&mut self, hooks: &dyn EngineHooks) -> anyhow::Result<EngineOutcome>;
}

/// Builds a fresh engine for a session.
pub trait EngineFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Box<dyn AgentEngine>;
}

/// The author of a message in an engine's conversation history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in a conversation history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
