//! Scripted LLM Client
//!
//! A deterministic `LLMClient` for development and integration testing. It
//! answers from a fixed keyword table, so the relay can be exercised end to
//! end without API keys or network access.

use crate::engine::{ChatTurn, Role};
use crate::llm_client::{LLMClient, LLMStream, LLMStreamEvent};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream;

/// Answers the last user message by keyword lookup.
pub struct ScriptedLLMClient {
    /// `(keywords, answer)` pairs, checked in order.
    responses: Vec<(Vec<String>, String)>,
    default_response: String,
}

impl ScriptedLLMClient {
    pub fn new(responses: Vec<(Vec<String>, String)>, default_response: String) -> Self {
        Self {
            responses,
            default_response,
        }
    }

    /// The stock table used by the development server.
    pub fn with_default_table() -> Self {
        let table: &[(&str, &str)] = &[
            (
                "hello",
                "Hello! I'm a Parley agent ready to help you. How can I assist you today?",
            ),
            (
                "hi",
                "Hi there! I'm your AI assistant. What would you like to talk about?",
            ),
            (
                "help",
                "I can help you with:\n• General conversation\n• Answering questions\n• Problem solving\n• Code assistance\n\nWhat would you like to explore?",
            ),
            (
                "test",
                "Great! The chat interface is working perfectly. I'm receiving your messages and responding through the WebSocket connection.",
            ),
            (
                "langroid",
                "Langroid is an agent framework. It provides:\n• Agent-based architecture\n• Tool usage capabilities\n• Multi-agent orchestration",
            ),
            (
                "bye|goodbye",
                "Goodbye! It was great chatting with you. Feel free to return anytime!",
            ),
        ];

        let responses = table
            .iter()
            .map(|(keys, answer)| {
                (
                    keys.split('|').map(str::to_string).collect(),
                    answer.to_string(),
                )
            })
            .collect();

        Self::new(
            responses,
            "I understand. I'm here to help with whatever you need. Feel free to ask me anything!"
                .to_string(),
        )
    }

    /// Picks the answer for a conversation.
    ///
    /// An exact match on a keyword wins over a keyword contained as a word
    /// in the message; otherwise the default response is used.
    pub fn answer_for(&self, messages: &[ChatTurn]) -> &str {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim().to_lowercase())
            .unwrap_or_default();

        let exact = self
            .responses
            .iter()
            .find(|(keys, _)| keys.iter().any(|k| *k == last_user));
        if let Some((_, answer)) = exact {
            return answer;
        }

        let words: Vec<&str> = last_user
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.responses
            .iter()
            .find(|(keys, _)| keys.iter().any(|k| words.contains(&k.as_str())))
            .map(|(_, answer)| answer.as_str())
            .unwrap_or(&self.default_response)
    }
}

/// Splits text into tokens that keep their trailing whitespace, so that
/// concatenating the tokens reproduces the input exactly.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn complete(&self, messages: Vec<ChatTurn>) -> Result<String> {
        Ok(self.answer_for(&messages).to_string())
    }

    async fn stream(&self, messages: Vec<ChatTurn>) -> Result<LLMStream> {
        let chunks = tokenize(self.answer_for(&messages))
            .into_iter()
            .map(|token| Ok(LLMStreamEvent::TextChunk(token)));
        Ok(Box::pin(stream::iter(chunks)))
    }
}
