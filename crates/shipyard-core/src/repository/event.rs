//! Event store trait definition.
//!
//! Events are kept per project in three collections (triggered, started,
//! finished). The controller uses the store as an audit trail of what it
//! emitted and received for in-flight tasks.

use shipyard_types::error::RepositoryError;
use shipyard_types::event::{EventKind, KeptnEvent};

/// Filter for event lookups. `project` is required, everything else narrows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub project: String,
    pub stage: Option<String>,
    pub service: Option<String>,
    pub keptn_context: Option<String>,
    pub triggered_id: Option<String>,
    pub event_type: Option<String>,
    pub id: Option<String>,
}

impl EventFilter {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    /// Whether a stored event satisfies the filter.
    pub fn matches(&self, event: &KeptnEvent) -> bool {
        let data = event.event_data();
        data.project == self.project
            && self.stage.as_deref().is_none_or(|s| data.stage == s)
            && self.service.as_deref().is_none_or(|s| data.service == s)
            && self
                .keptn_context
                .as_deref()
                .is_none_or(|c| event.shkeptncontext == c)
            && self
                .triggered_id
                .as_deref()
                .is_none_or(|t| event.triggeredid == t)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| event.event_type == t)
            && self.id.as_deref().is_none_or(|id| event.id == id)
    }
}

/// Repository trait for event persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait EventRepository: Send + Sync {
    /// Store an event in the project's collection for `kind`.
    fn insert_event(
        &self,
        project: &str,
        event: &KeptnEvent,
        kind: EventKind,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events of `kind` matching the filter, oldest first.
    fn get_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> impl std::future::Future<Output = Result<Vec<KeptnEvent>, RepositoryError>> + Send;

    /// Delete events of `kind` matching the filter. Returns the number removed.
    fn delete_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Drop every event stored for a project.
    fn delete_event_collections(
        &self,
        project: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
