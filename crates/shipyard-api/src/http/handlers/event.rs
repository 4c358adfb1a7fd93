//! Event endpoint handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shipyard_core::repository::event::{EventFilter, EventRepository};
use shipyard_types::event::{EventKind, EventType, KeptnEvent};

use crate::http::error::AppError;
use crate::http::extractors::query::{EventQuery, non_empty};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Source recorded for events posted without one.
const DEFAULT_SOURCE: &str = "api";

/// Inbound lifecycle event. Only `type` and `data` are required.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shkeptncontext: String,
    #[serde(default)]
    pub triggeredid: String,
    #[serde(default)]
    pub gitcommitid: String,
    #[serde(default)]
    pub data: Value,
}

impl EventRequest {
    /// Build the event, assigning a keptn context to opening events that
    /// lack one.
    fn into_event(self) -> KeptnEvent {
        let mut event = KeptnEvent::new(self.event_type, self.data)
            .with_source(self.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()))
            .with_triggered_id(self.triggeredid)
            .with_git_commit_id(self.gitcommitid);
        if let Some(id) = self.id.filter(|id| !id.is_empty()) {
            event.id = id;
        }
        if let Some(time) = self.time {
            event.time = time;
        }

        let opens_sequence = matches!(
            event.parsed_type(),
            Ok(EventType::Sequence {
                kind: EventKind::Triggered,
                ..
            })
        );
        event.shkeptncontext = if self.shkeptncontext.is_empty() && opens_sequence {
            uuid::Uuid::now_v7().to_string()
        } else {
            self.shkeptncontext
        };
        event
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub keptn_context: String,
}

/// POST /v1/event - Hand an inbound event to the controller.
pub async fn post_event(
    State(state): State<AppState>,
    Json(body): Json<EventRequest>,
) -> Result<Json<ApiResponse<EventContext>>, AppError> {
    let start = Instant::now();

    let event = body.into_event();
    let keptn_context = event.shkeptncontext.clone();
    state.controller.handle_incoming_event(event).await?;

    let resp = ApiResponse::success(EventContext { keptn_context }, start)
        .with_link("events", "/v1/event");
    Ok(Json(resp))
}

/// GET /v1/event - List stored events of a project, oldest first.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<ApiResponse<Vec<KeptnEvent>>>, AppError> {
    let start = Instant::now();

    let project = non_empty(&query.project)
        .ok_or_else(|| AppError::Validation("project must be set".to_string()))?;
    let filter = EventFilter {
        stage: non_empty(&query.stage),
        service: non_empty(&query.service),
        keptn_context: non_empty(&query.keptn_context),
        event_type: non_empty(&query.event_type),
        ..EventFilter::for_project(project)
    };

    let mut events = Vec::new();
    for kind in query.kinds()? {
        events.extend(state.events.get_events(&filter, kind).await?);
    }
    events.sort_by_key(|e| e.time);

    Ok(Json(ApiResponse::success(events, start)))
}
