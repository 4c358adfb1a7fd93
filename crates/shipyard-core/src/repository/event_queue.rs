//! Outbound event queue trait definition.

use chrono::{DateTime, Utc};
use shipyard_types::error::RepositoryError;
use shipyard_types::event::KeptnEvent;

/// An outbound event held back until `dispatch_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub event: KeptnEvent,
    pub dispatch_at: DateTime<Utc>,
}

/// Repository trait for deferred outbound events.
///
/// Events stay queued until they are deleted after a successful send, so
/// a restart resends whatever was due but not yet delivered.
pub trait EventQueueRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when the event id is
    /// already queued.
    fn queue_event(
        &self,
        event: &QueuedEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events whose dispatch time is at or before `now`, earliest first.
    fn get_due_events(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<QueuedEvent>, RepositoryError>> + Send;

    /// Returns whether the event was still queued.
    fn delete_event(
        &self,
        event_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn count_events(&self) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
