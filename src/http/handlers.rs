use super::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendTextResponse {
    pub sent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
    /// False when the toggle is present but inert
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn internal_error(action: &str, e: anyhow::Error) -> Response {
    error!("Failed to {}: {:#}", action, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Failed to {}: {}", action, e),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /call
/// Current call snapshot
pub async fn get_call(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.call.snapshot()))
}

/// GET /call/transcript
pub async fn get_transcript(State(state): State<AppState>) -> Response {
    match state.call.transcript().await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => internal_error("read transcript", e),
    }
}

/// POST /call/open
/// Open the call; returns the snapshot right after opening
pub async fn open_call(State(state): State<AppState>) -> Response {
    info!("Open call requested");
    match state.call.open().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => internal_error("open call", e),
    }
}

/// POST /call/end
pub async fn end_call(State(state): State<AppState>) -> Response {
    info!("End call requested");
    match state.call.end().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => internal_error("end call", e),
    }
}

/// POST /call/mute
pub async fn toggle_mute(State(state): State<AppState>) -> Response {
    match state.call.toggle_mute().await {
        Ok(muted) => (
            StatusCode::OK,
            Json(MuteResponse {
                muted,
                enabled: state.mute_enabled,
            }),
        )
            .into_response(),
        Err(e) => internal_error("toggle mute", e),
    }
}

/// POST /call/text
/// Send a typed message to the endpoint
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> Response {
    let text = req.text.trim();
    if text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Text must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    match state.call.send_text(text).await {
        Ok(true) => (StatusCode::OK, Json(SendTextResponse { sent: true })).into_response(),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Call is not connected".to_string(),
            }),
        )
            .into_response(),
        Err(e) => internal_error("send text", e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
