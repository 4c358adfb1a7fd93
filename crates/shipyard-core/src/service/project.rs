//! Project-wide cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::QueryError;
use crate::repository::event::EventRepository;
use crate::repository::sequence_execution::SequenceExecutionRepository;
use crate::repository::sequence_queue::{QueueFilter, SequenceQueueRepository};
use crate::repository::with_timeout;

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub queued_sequences: u64,
    pub sequence_executions: u64,
}

pub struct ProjectService<E, X, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    Q: SequenceQueueRepository,
{
    events: Arc<E>,
    executions: Arc<X>,
    queue: Arc<Q>,
    store_timeout: Duration,
}

impl<E, X, Q> ProjectService<E, X, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    Q: SequenceQueueRepository,
{
    pub fn new(events: Arc<E>, executions: Arc<X>, queue: Arc<Q>) -> Self {
        Self {
            events,
            executions,
            queue,
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Remove every queued item, execution record and stored event of a
    /// project. The queue goes first so nothing is started mid-purge.
    #[tracing::instrument(name = "purge_project", skip(self))]
    pub async fn purge(&self, project: &str) -> Result<PurgeSummary, QueryError> {
        if project.is_empty() {
            return Err(QueryError::Validation("project must not be empty".to_string()));
        }

        let filter = QueueFilter {
            project: Some(project.to_string()),
            ..Default::default()
        };
        let queued_sequences =
            with_timeout(self.store_timeout, self.queue.delete_queue_items(&filter)).await?;
        let sequence_executions =
            with_timeout(self.store_timeout, self.executions.clear(project)).await?;
        with_timeout(self.store_timeout, self.events.delete_event_collections(project)).await?;

        tracing::info!(project, queued_sequences, sequence_executions, "project purged");
        Ok(PurgeSummary {
            queued_sequences,
            sequence_executions,
        })
    }
}
