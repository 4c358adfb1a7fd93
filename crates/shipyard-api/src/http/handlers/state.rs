//! Sequence state view handler.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};

use shipyard_types::state::SequenceStates;

use crate::http::error::AppError;
use crate::http::extractors::query::{SequenceStateQuery, non_empty};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /v1/sequence-state/{project} - Per-context progress of a project.
pub async fn get_sequence_states(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<SequenceStateQuery>,
) -> Result<Json<ApiResponse<SequenceStates>>, AppError> {
    let start = Instant::now();

    let keptn_context = non_empty(&query.keptn_context);
    let states = state
        .state_service
        .get_states(&project, keptn_context.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(states, start)))
}
