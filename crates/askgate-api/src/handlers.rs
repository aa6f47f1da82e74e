//! Route handlers for the askgate API.
//!
//! Handlers only translate between HTTP and the chat services; all
//! behavior lives in `askgate-chat`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use askgate_chat::{AskRequest, AskResponse};
use askgate_core::types::{Session, SessionSummary};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request/response types
// =============================================================================

/// Query string naming the history owner.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerParams {
    #[serde(default)]
    pub owner_email: Option<String>,
}

impl OwnerParams {
    fn owner(&self) -> &str {
        self.owner_email.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /ask - answer a question and return before history is written.
pub async fn ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let response = state.orchestrator.ask(request).await?;
    debug!(session_id = %response.session_id, stores = ?response.stores_used, "Ask served");
    Ok(Json(response))
}

/// GET /sessions?ownerEmail= - the owner's sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.sessions.list_sessions(params.owner()).await?;
    Ok(Json(SessionListResponse { sessions }))
}

/// GET /sessions/{session_id}?ownerEmail= - one full session record.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .sessions
        .get_session(params.owner(), &session_id)
        .await?;
    Ok(Json(session))
}

/// GET /health - unauthenticated liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
