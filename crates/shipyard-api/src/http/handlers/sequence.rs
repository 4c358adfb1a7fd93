//! Sequence control and sequence execution query handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use shipyard_core::controller::{SequenceCancellation, SequenceTimeout};
use shipyard_core::repository::sequence_execution::SequenceExecutionFilter;
use shipyard_types::api::{SequenceExecution, SequenceExecutions};

use crate::http::error::AppError;
use crate::http::extractors::query::{SequenceExecutionQuery, non_empty};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for `POST /v1/sequence/{project}/{keptnContext}/control`.
#[derive(Debug, Deserialize)]
pub struct SequenceControlRequest {
    /// Only `abort` is supported.
    pub state: String,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceControlResponse {
    pub keptn_context: String,
    pub state: String,
}

/// POST /v1/sequence/{project}/{keptnContext}/control - Abort a sequence.
pub async fn control_sequence(
    State(state): State<AppState>,
    Path((project, keptn_context)): Path<(String, String)>,
    Json(body): Json<SequenceControlRequest>,
) -> Result<Json<ApiResponse<SequenceControlResponse>>, AppError> {
    let start = Instant::now();

    if body.state != "abort" {
        return Err(AppError::Validation(format!(
            "unsupported sequence control state '{}'",
            body.state
        )));
    }

    state
        .controller
        .cancel_sequence(SequenceCancellation {
            keptn_context: keptn_context.clone(),
            project,
            stage: body.stage.filter(|s| !s.is_empty()),
        })
        .await?;

    Ok(Json(ApiResponse::success(
        SequenceControlResponse {
            keptn_context,
            state: body.state,
        },
        start,
    )))
}

/// POST /v1/sequence/timeout - Time out the sequence waiting on `lastEvent`.
pub async fn timeout_sequence(
    State(state): State<AppState>,
    Json(body): Json<SequenceTimeout>,
) -> Result<Json<ApiResponse<SequenceControlResponse>>, AppError> {
    let start = Instant::now();

    let keptn_context = body.keptn_context.clone();
    state.controller.timeout_sequence(body).await?;

    Ok(Json(ApiResponse::success(
        SequenceControlResponse {
            keptn_context,
            state: "timedOut".to_string(),
        },
        start,
    )))
}

/// Either the aggregated view of one context or a plain list.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SequenceExecutionResult {
    Aggregated(SequenceExecutions),
    List(Vec<SequenceExecution>),
}

/// GET /v1/sequence-execution - Query sequence executions.
///
/// With `keptnContext` and `service` set (and no other narrowing), the
/// executions of that context are aggregated across stages.
pub async fn list_sequence_executions(
    State(state): State<AppState>,
    Query(query): Query<SequenceExecutionQuery>,
) -> Result<Json<ApiResponse<SequenceExecutionResult>>, AppError> {
    let start = Instant::now();

    let project = non_empty(&query.project)
        .ok_or_else(|| AppError::Validation("project must be set".to_string()))?;
    let states = query.states()?;
    let stage = non_empty(&query.stage);
    let name = non_empty(&query.name);

    let result = match (non_empty(&query.keptn_context), non_empty(&query.service)) {
        (Some(keptn_context), Some(service))
            if stage.is_none() && name.is_none() && states.is_empty() =>
        {
            SequenceExecutionResult::Aggregated(
                state
                    .execution_service
                    .for_context(&project, &service, &keptn_context)
                    .await?,
            )
        }
        (keptn_context, service) => {
            let filter = SequenceExecutionFilter {
                project: Some(project),
                stage,
                service,
                keptn_context,
                sequence_name: name,
                states,
                ..Default::default()
            };
            SequenceExecutionResult::List(state.execution_service.list(&filter).await?)
        }
    };

    Ok(Json(ApiResponse::success(result, start)))
}
