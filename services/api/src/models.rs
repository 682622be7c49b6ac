//! HTTP API Models
//!
//! Response bodies of the REST endpoints, documented for OpenAPI with
//! `utoipa`.

use crate::ws::protocol::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A point-in-time view of one live session.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    /// Identity the client supplied when connecting, if any.
    pub client_id: Option<String>,
    #[schema(value_type = String, example = "connected")]
    pub status: ConnectionStatus,
    /// Whether the session's turn loop is alive.
    pub running: bool,
    /// Whether the engine is currently blocked waiting for user input.
    pub waiting_for_user: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    /// The configured LLM provider.
    #[schema(example = "mock")]
    pub backend: String,
    pub active_sessions: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct RootResponse {
    #[schema(example = "Parley chat relay")]
    pub message: String,
    pub version: String,
    /// Routes the service exposes.
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct EndpointInfo {
    pub name: String,
    pub path: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
