//! Dispatcher control handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use shipyard_core::dispatch::leadership::DispatcherMode;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatus {
    pub paused: bool,
    pub queued_events: u64,
    pub mode: DispatcherMode,
}

async fn status(state: &AppState) -> Result<DispatcherStatus, AppError> {
    let queued_events = state.event_dispatcher.queued_len().await?;
    let mode = *state.leadership.borrow();
    Ok(DispatcherStatus {
        paused: state.event_dispatcher.is_paused(),
        queued_events,
        mode,
    })
}

/// GET /v1/dispatcher - Event dispatcher and leadership status.
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DispatcherStatus>>, AppError> {
    let start = Instant::now();
    Ok(Json(ApiResponse::success(status(&state).await?, start)))
}

/// POST /v1/dispatcher/pause - Hold back queued outbound events.
pub async fn pause(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DispatcherStatus>>, AppError> {
    let start = Instant::now();
    state.event_dispatcher.pause();
    Ok(Json(ApiResponse::success(status(&state).await?, start)))
}

/// POST /v1/dispatcher/resume - Release queued outbound events again.
pub async fn resume(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DispatcherStatus>>, AppError> {
    let start = Instant::now();
    state.event_dispatcher.resume();
    Ok(Json(ApiResponse::success(status(&state).await?, start)))
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: DispatcherMode,
}

/// PUT /v1/dispatcher/mode - Grant or revoke write leadership.
pub async fn set_mode(
    State(state): State<AppState>,
    Json(body): Json<SetModeRequest>,
) -> Result<Json<ApiResponse<DispatcherStatus>>, AppError> {
    let start = Instant::now();
    state.leadership.send_replace(body.mode);
    tracing::info!(mode = ?body.mode, "dispatcher mode changed");
    Ok(Json(ApiResponse::success(status(&state).await?, start)))
}
