//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use shipyard_types::event::EventKind;
use shipyard_types::sequence::SequenceState;

use crate::http::error::AppError;

/// Query parameters for `GET /v1/event`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub project: Option<String>,
    /// `triggered`, `started` or `finished`; every kind when absent.
    pub kind: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub stage: Option<String>,
    pub service: Option<String>,
    pub keptn_context: Option<String>,
}

impl EventQuery {
    pub fn kinds(&self) -> Result<Vec<EventKind>, AppError> {
        match self.kind.as_deref() {
            None | Some("") => Ok(vec![EventKind::Triggered, EventKind::Started, EventKind::Finished]),
            Some(kind) => Ok(vec![kind.parse().map_err(AppError::Validation)?]),
        }
    }
}

/// Query parameters for `GET /v1/sequence-execution`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecutionQuery {
    pub project: Option<String>,
    pub stage: Option<String>,
    pub service: Option<String>,
    pub keptn_context: Option<String>,
    pub name: Option<String>,
    /// Comma-separated states, e.g. `started,queued`.
    pub status: Option<String>,
}

impl SequenceExecutionQuery {
    pub fn states(&self) -> Result<Vec<SequenceState>, AppError> {
        self.status
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().map_err(AppError::Validation))
            .collect()
    }
}

/// Query parameters for `GET /v1/sequence-state/{project}`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStateQuery {
    pub keptn_context: Option<String>,
}

/// Treat `?x=` like an absent parameter.
pub fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}
