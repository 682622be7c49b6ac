//! Main Entrypoint for the Parley Chat Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing the LLM client and building the engine factory.
//! 3. Constructing the session registry and the Axum router.
//! 4. Reaping sessions whose clients never came back.
//! 5. Starting the web server and shutting sessions down afterwards.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use axum::http::{HeaderValue, Method};
use parley_api::{
    config::{Config, Provider},
    router::create_router,
    session::SessionRegistry,
    state::AppState,
};
use parley_core::{
    chat_engine::ChatEngineFactory,
    llm_client::{LLMClient, OpenAICompatibleClient},
    scripted::ScriptedLLMClient,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutting down");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn build_llm_client(config: &Config) -> anyhow::Result<Arc<dyn LLMClient>> {
    match config.provider {
        Provider::Mock => {
            info!("Using the built-in mock LLM.");
            Ok(Arc::new(ScriptedLLMClient::with_default_table()))
        }
        Provider::OpenAI => {
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the OpenAI provider")?;
            let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
            if let Some(base) = &config.openai_api_base {
                openai_config = openai_config.with_api_base(base);
            }
            info!(model = %config.chat_model, "Using an OpenAI-compatible LLM.");
            Ok(Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
            )))
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let llm_client = build_llm_client(&config)?;
    let factory = Arc::new(ChatEngineFactory::new(
        llm_client,
        Handle::current(),
        config.engine_config(),
    ));
    let registry = Arc::new(SessionRegistry::new(factory, config.session_settings()));

    let app_state = Arc::new(AppState {
        registry: registry.clone(),
        config: Arc::new(config.clone()),
    });

    // --- 4. Reap Abandoned Sessions ---
    let reaper = {
        let registry = registry.clone();
        let idle_timeout = config.session_idle_timeout;
        let period = (idle_timeout / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.reap_idle(idle_timeout).await;
            }
        })
    };

    // --- 5. Create Router and Apply Middleware ---
    let app = create_router(app_state).layer(cors_layer(&config.cors_origins));

    // --- 6. Start Server ---
    info!(
        provider = %config.provider,
        stream = config.stream_responses,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    reaper.abort();
    registry.shutdown_all().await;
    info!("Server has shut down.");
    Ok(())
}
