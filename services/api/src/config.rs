use crate::{bridge::WaitLimits, session::SessionSettings};
use parley_core::chat_engine::ChatEngineConfig;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where the chat engines get their answers from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAI,
    /// The built-in keyword table; needs no network access.
    Mock,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAI => write!(f, "openai"),
            Provider::Mock => write!(f, "mock"),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub chat_model: String,
    pub stream_responses: bool,
    pub cache_responses: bool,
    pub system_prompt: Option<String>,
    pub greeting: Option<String>,
    pub input_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub worker_join_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub cors_origins: Vec<String>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(value) = var(name) else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", value),
        )),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    Ok(parse_flag(name)?.unwrap_or(default))
}

fn parse_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let openai_api_key = var("OPENAI_API_KEY");
        let provider = match (parse_flag("USE_MOCK_LLM")?, &openai_api_key) {
            (Some(true), _) | (None, None) => Provider::Mock,
            (Some(false), None) => {
                return Err(ConfigError::MissingVar(
                    "OPENAI_API_KEY must be set when USE_MOCK_LLM is false".to_string(),
                ));
            }
            (_, Some(_)) => Provider::OpenAI,
        };

        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| {
                "http://localhost:5173,http://localhost:3000,http://localhost:8080".to_string()
            })
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            log_level,
            provider,
            openai_api_key,
            openai_api_base: var("OPENAI_API_BASE"),
            chat_model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            stream_responses: parse_bool("STREAM_RESPONSES", true)?,
            cache_responses: parse_bool("CACHE_RESPONSES", false)?,
            system_prompt: var("SYSTEM_PROMPT"),
            greeting: var("GREETING"),
            input_timeout: parse_secs("INPUT_TIMEOUT_SECS", 300)?,
            reconnect_timeout: parse_secs("RECONNECT_TIMEOUT_SECS", 300)?,
            worker_join_timeout: parse_secs("WORKER_JOIN_TIMEOUT_SECS", 5)?,
            session_idle_timeout: parse_secs("SESSION_IDLE_TIMEOUT_SECS", 600)?,
            cors_origins,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            limits: WaitLimits {
                input_timeout: self.input_timeout,
                reconnect_timeout: self.reconnect_timeout,
            },
            join_timeout: self.worker_join_timeout,
        }
    }

    pub fn engine_config(&self) -> ChatEngineConfig {
        let defaults = ChatEngineConfig::default();
        ChatEngineConfig {
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or(defaults.system_prompt),
            stream: self.stream_responses,
            cache_responses: self.cache_responses,
            greeting: self.greeting.clone(),
        }
    }
}
