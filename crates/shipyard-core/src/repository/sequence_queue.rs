//! Sequence queue trait definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipyard_types::error::RepositoryError;
use shipyard_types::scope::EventScope;
use uuid::Uuid;

/// A sequence execution waiting to be started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub execution_id: Uuid,
    pub scope: EventScope,
    pub queued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(execution_id: Uuid, scope: EventScope) -> Self {
        Self {
            execution_id,
            scope,
            queued_at: Utc::now(),
        }
    }
}

/// Selects queue items to remove. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub execution_id: Option<Uuid>,
    pub project: Option<String>,
    pub stage: Option<String>,
    pub keptn_context: Option<String>,
}

impl QueueFilter {
    pub fn by_execution(execution_id: Uuid) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        self.execution_id.is_none_or(|id| item.execution_id == id)
            && self
                .project
                .as_deref()
                .is_none_or(|p| item.scope.project == p)
            && self.stage.as_deref().is_none_or(|s| item.scope.stage == s)
            && self
                .keptn_context
                .as_deref()
                .is_none_or(|c| item.scope.keptn_context == c)
    }

    fn is_empty(&self) -> bool {
        *self == QueueFilter::default()
    }

    /// Reject filters that would match the whole queue.
    pub fn ensure_narrowed(&self) -> Result<(), RepositoryError> {
        if self.is_empty() {
            return Err(RepositoryError::Query(
                "refusing to delete queue items without a filter".to_string(),
            ));
        }
        Ok(())
    }
}

/// Repository trait for the sequence start queue.
pub trait SequenceQueueRepository: Send + Sync {
    fn queue_sequence(
        &self,
        item: &QueueItem,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All queued items, oldest first.
    fn get_queued_sequences(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<QueueItem>, RepositoryError>> + Send;

    /// Remove items matching the filter. Returns the number removed.
    fn delete_queue_items(
        &self,
        filter: &QueueFilter,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
