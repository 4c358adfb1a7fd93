//! Project maintenance handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use shipyard_core::service::project::PurgeSummary;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// DELETE /v1/project/{project} - Drop every queued sequence, execution
/// and stored event of a project.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<PurgeSummary>>, AppError> {
    let start = Instant::now();
    let summary = state.project_service.purge(&project).await?;
    Ok(Json(ApiResponse::success(summary, start)))
}
