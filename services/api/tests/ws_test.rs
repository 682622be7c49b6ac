//! End-to-end tests: a real server on a loopback port, driven by a
//! WebSocket client.

use futures_util::{SinkExt, StreamExt};
use parley_api::{
    config::{Config, Provider},
    router::create_router,
    session::{SessionRegistry, SessionSettings},
    state::AppState,
    ws::protocol::ConnectionStatus,
};
use parley_core::{
    chat_engine::{ChatEngineConfig, ChatEngineFactory},
    scripted::ScriptedLLMClient,
};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const GREETING: &str = "Welcome to Parley!";

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: tracing::Level::INFO,
        provider: Provider::Mock,
        openai_api_key: None,
        openai_api_base: None,
        chat_model: "gpt-4o-mini".to_string(),
        stream_responses: true,
        cache_responses: false,
        system_prompt: None,
        greeting: Some(GREETING.to_string()),
        input_timeout: Duration::from_secs(300),
        reconnect_timeout: Duration::from_secs(300),
        worker_join_timeout: Duration::from_secs(5),
        session_idle_timeout: Duration::from_secs(600),
        cors_origins: vec![],
    }
}

async fn spawn_server() -> (SocketAddr, Arc<SessionRegistry>) {
    let config = test_config();
    let factory = Arc::new(ChatEngineFactory::new(
        Arc::new(ScriptedLLMClient::with_default_table()),
        Handle::current(),
        ChatEngineConfig {
            greeting: config.greeting.clone(),
            ..Default::default()
        },
    ));
    let registry = Arc::new(SessionRegistry::new(factory, SessionSettings::default()));
    let state = Arc::new(AppState {
        registry: registry.clone(),
        config: Arc::new(config),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr, client_id: Option<&str>) -> Client {
    let url = match client_id {
        Some(id) => format!("ws://{addr}/ws?client_id={id}"),
        None => format!("ws://{addr}/ws"),
    };
    let (client, _) = connect_async(url).await.expect("WebSocket handshake failed");
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("server sent invalid JSON");
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Reads the connection status and greeting every new session starts with.
async fn expect_welcome(client: &mut Client) -> String {
    let status = next_json(client).await;
    assert_eq!(status["type"], "connection_status");
    assert_eq!(status["status"], "connected");
    let session_id = status["session_id"].as_str().unwrap().to_string();

    let greeting = next_json(client).await;
    assert_eq!(greeting["type"], "complete_message");
    assert_eq!(greeting["content"], GREETING);
    assert_eq!(greeting["sender"], "assistant");
    session_id
}

/// Collects one streamed response and returns its text.
async fn expect_stream(client: &mut Client) -> String {
    let start = next_json(client).await;
    assert_eq!(start["type"], "stream_start");
    let stream_id = start["message_id"].clone();

    let mut text = String::new();
    loop {
        let event = next_json(client).await;
        assert_eq!(event["message_id"], stream_id);
        match event["type"].as_str() {
            Some("stream_token") => text.push_str(event["token"].as_str().unwrap()),
            Some("stream_end") => return text,
            other => panic!("unexpected event in stream: {:?}", other),
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> reqwest::Response {
    reqwest::get(format!("http://{addr}{path}")).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_round_trip_streams_response() {
    let (addr, _registry) = spawn_server().await;
    let mut client = connect(addr, None).await;
    expect_welcome(&mut client).await;

    send_json(&mut client, json!({"type": "message", "content": "hello"})).await;
    let text = expect_stream(&mut client).await;
    assert!(text.starts_with("Hello! I'm a Parley agent"));

    // The streamed answer is not repeated as a complete message.
    send_json(&mut client, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_and_malformed_messages_are_ignored() {
    let (addr, _registry) = spawn_server().await;
    let mut client = connect(addr, None).await;
    expect_welcome(&mut client).await;

    send_json(&mut client, json!({"type": "telemetry", "data": 1})).await;
    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    send_json(&mut client, json!({"type": "ping"})).await;

    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_with_client_id_resumes_session() {
    let (addr, registry) = spawn_server().await;
    let mut first = connect(addr, Some("tab-1")).await;
    let session_id = expect_welcome(&mut first).await;
    first.close(None).await.unwrap();

    let id: Uuid = session_id.parse().unwrap();
    let session = registry.get(id).await.expect("session should be kept");
    for _ in 0..200 {
        if session.status() == ConnectionStatus::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.status(), ConnectionStatus::Disconnected);

    let mut second = connect(addr, Some("tab-1")).await;
    let status = next_json(&mut second).await;
    assert_eq!(status["type"], "connection_status");
    assert_eq!(status["session_id"], session_id.as_str());
    assert_eq!(status["message"], "Reconnected to existing session");

    send_json(&mut second, json!({"type": "message", "content": "test"})).await;
    let text = expect_stream(&mut second).await;
    assert!(text.contains("chat interface is working"));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_command_reports_back() {
    let (addr, _registry) = spawn_server().await;
    let mut client = connect(addr, None).await;
    expect_welcome(&mut client).await;

    send_json(&mut client, json!({"type": "command", "command": "clear"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "complete_message");
    assert_eq!(reply["sender"], "system");
    assert_eq!(reply["content"], "Chat history cleared.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_and_session_listing() {
    let (addr, _registry) = spawn_server().await;
    let mut client = connect(addr, Some("observer")).await;
    let session_id = expect_welcome(&mut client).await;

    let response = http_get(addr, "/health").await;
    assert_eq!(response.status(), 200);
    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["backend"], "mock");
    assert_eq!(health["active_sessions"], 1);

    let response = http_get(addr, "/sessions").await;
    assert_eq!(response.status(), 200);
    let sessions: Value = response.json().await.unwrap();
    assert_eq!(sessions[0]["id"], session_id.as_str());
    assert_eq!(sessions[0]["client_id"], "observer");
    assert_eq!(sessions[0]["status"], "connected");

    let response = http_get(addr, &format!("/sessions/{session_id}")).await;
    assert_eq!(response.status(), 200);
    let session: Value = response.json().await.unwrap();
    assert_eq!(session["id"], session_id.as_str());
    assert_eq!(session["running"], true);

    let response = http_get(addr, &format!("/sessions/{}", Uuid::new_v4())).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_session_stops_it() {
    let (addr, registry) = spawn_server().await;
    let mut client = connect(addr, Some("closing")).await;
    let session_id = expect_welcome(&mut client).await;
    let session = registry.get(session_id.parse().unwrap()).await.unwrap();

    let http = reqwest::Client::new();
    let url = format!("http://{addr}/sessions/{session_id}");
    let response = http.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 204);
    assert!(!session.is_running());

    let sessions: Value = http_get(addr, "/sessions").await.json().await.unwrap();
    assert_eq!(sessions, json!([]));
    assert_eq!(http_get(addr, &format!("/sessions/{session_id}")).await.status(), 404);

    let response = http.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);
}
