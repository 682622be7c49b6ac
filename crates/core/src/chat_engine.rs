//! Interactive Chat Engine
//!
//! A blocking, turn-based conversational engine. It asks its hooks for user
//! input, sends the conversation to an [`LLMClient`] and reports the answer
//! back through the hooks, either as a token stream or as a whole response.

use crate::engine::{
    AgentEngine, ChatTurn, EngineFactory, EngineHooks, EngineOutcome, Role, UserInput,
};
use crate::llm_client::{LLMClient, LLMStreamEvent};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Tunables shared by every engine a factory creates.
#[derive(Debug, Clone)]
pub struct ChatEngineConfig {
    pub system_prompt: String,
    /// Deliver responses token by token.
    pub stream: bool,
    /// Answer a repeated question from the cache instead of the LLM.
    pub cache_responses: bool,
    /// Sent as the first response, before any user input.
    pub greeting: Option<String>,
}

impl Default for ChatEngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful AI assistant, communicating through a web interface. Be concise, friendly, and helpful.".to_string(),
            stream: true,
            cache_responses: false,
            greeting: None,
        }
    }
}

pub struct ChatEngine {
    name: String,
    client: Arc<dyn LLMClient>,
    runtime: Handle,
    config: ChatEngineConfig,
    history: Vec<ChatTurn>,
    cache: HashMap<String, String>,
}

impl ChatEngine {
    /// Creates an engine. `runtime` is used to drive the async client from
    /// the engine's blocking thread, which must not itself be a runtime worker.
    pub fn new(
        name: String,
        client: Arc<dyn LLMClient>,
        runtime: Handle,
        config: ChatEngineConfig,
    ) -> Self {
        Self {
            name,
            client,
            runtime,
            config,
            history: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// The conversation so far, excluding the system prompt.
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn messages(&self) -> Vec<ChatTurn> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatTurn::new(Role::System, self.config.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// Runs one turn for `user_text`.
    fn respond(&mut self, user_text: String, hooks: &dyn EngineHooks) -> Result<()> {
        hooks.start_turn();
        self.history.push(ChatTurn::new(Role::User, user_text.clone()));

        if self.config.cache_responses {
            if let Some(cached) = self.cache.get(&user_text).cloned() {
                debug!(engine = %self.name, "Answering from response cache");
                hooks.llm_response(&cached, true);
                hooks.show_llm_response(&cached, true);
                self.history.push(ChatTurn::new(Role::Assistant, cached));
                return Ok(());
            }
        }

        let content = if self.config.stream {
            self.stream_response(hooks)?
        } else {
            let messages = self.messages();
            self.runtime
                .block_on(self.client.complete(messages))
                .context("LLM completion failed")?
        };

        // Both notification paths fire for every response.
        hooks.llm_response(&content, false);
        hooks.show_llm_response(&content, false);

        if self.config.cache_responses && !content.trim().is_empty() {
            self.cache.insert(user_text, content.clone());
        }
        self.history.push(ChatTurn::new(Role::Assistant, content));
        Ok(())
    }

    fn stream_response(&self, hooks: &dyn EngineHooks) -> Result<String> {
        let messages = self.messages();
        let client = self.client.clone();
        let mut on_token = hooks.start_stream();

        let streamed = self.runtime.block_on(async {
            let mut stream = client.stream(messages).await?;
            let mut content = String::new();
            while let Some(event) = stream.next().await {
                let LLMStreamEvent::TextChunk(chunk) = event?;
                on_token(&chunk);
                content.push_str(&chunk);
            }
            anyhow::Ok(content)
        });
        drop(on_token);

        match streamed {
            Ok(content) => {
                hooks.finish_stream(&content);
                Ok(content)
            }
            Err(e) => {
                hooks.cancel_stream();
                Err(e.context("LLM stream failed"))
            }
        }
    }
}

impl AgentEngine for ChatEngine {
    fn run(&mut self, hooks: &dyn EngineHooks) -> Result<EngineOutcome> {
        info!(engine = %self.name, "Chat engine started");

        if let Some(greeting) = self.config.greeting.clone() {
            hooks.start_turn();
            hooks.llm_response(&greeting, false);
            self.history.push(ChatTurn::new(Role::Assistant, greeting));
        }

        loop {
            match hooks.user_response(None) {
                UserInput::Terminate => {
                    info!(engine = %self.name, "Received terminal input; stopping");
                    return Ok(EngineOutcome::Terminated);
                }
                UserInput::ClearHistory => {
                    debug!(engine = %self.name, "Clearing conversation history");
                    self.clear_history();
                }
                UserInput::Text(text) if text.trim().is_empty() => {
                    debug!(engine = %self.name, "Ignoring blank input");
                }
                UserInput::Text(text) => self.respond(text, hooks)?,
            }
        }
    }
}

/// Creates [`ChatEngine`]s that share one LLM client.
pub struct ChatEngineFactory {
    client: Arc<dyn LLMClient>,
    runtime: Handle,
    config: ChatEngineConfig,
}

impl ChatEngineFactory {
    pub fn new(client: Arc<dyn LLMClient>, runtime: Handle, config: ChatEngineConfig) -> Self {
        Self {
            client,
            runtime,
            config,
        }
    }
}

impl EngineFactory for ChatEngineFactory {
    fn create(&self, session_id: &str) -> Box<dyn AgentEngine> {
        let short_id: String = session_id.chars().take(8).collect();
        Box::new(ChatEngine::new(
            format!("Assistant-{}", short_id),
            self.client.clone(),
            self.runtime.clone(),
            self.config.clone(),
        ))
    }
}
