//! Event scope: the identity tying an event to a pipeline run.

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;
use crate::event::KeptnEvent;

/// Identity of a pipeline run derived from an event's payload and
/// correlation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    pub project: String,
    pub stage: String,
    #[serde(default)]
    pub service: String,
    pub keptn_context: String,
    #[serde(default)]
    pub triggered_id: String,
    #[serde(default, rename = "gitcommitid")]
    pub git_commit_id: String,
    #[serde(default)]
    pub event_type: String,
}

impl EventScope {
    /// Derive the scope of an event.
    ///
    /// Project, stage and keptn context must be present; service may be
    /// empty here and is checked by callers that need it.
    pub fn from_event(event: &KeptnEvent) -> Result<Self, ScopeError> {
        if !event.data.is_object() {
            return Err(ScopeError::MalformedData);
        }
        let data = event.event_data();

        if data.project.is_empty() {
            return Err(ScopeError::Missing("project"));
        }
        if data.stage.is_empty() {
            return Err(ScopeError::Missing("stage"));
        }
        if event.shkeptncontext.is_empty() {
            return Err(ScopeError::Missing("keptnContext"));
        }

        Ok(Self {
            project: data.project,
            stage: data.stage,
            service: data.service,
            keptn_context: event.shkeptncontext.clone(),
            triggered_id: event.triggeredid.clone(),
            git_commit_id: event.gitcommitid.clone(),
            event_type: event.event_type.clone(),
        })
    }

    /// Whether two scopes compete for the same resource slot.
    pub fn same_slot(&self, other: &EventScope) -> bool {
        self.project == other.project && self.stage == other.stage && self.service == other.service
    }
}
