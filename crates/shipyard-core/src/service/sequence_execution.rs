//! Sequence execution queries.

use std::sync::Arc;
use std::time::Duration;

use shipyard_types::api::{SequenceExecution, SequenceExecutions};

use super::QueryError;
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::repository::with_timeout;

pub struct SequenceExecutionService<X: SequenceExecutionRepository> {
    executions: Arc<X>,
    store_timeout: Duration,
}

impl<X: SequenceExecutionRepository> SequenceExecutionService<X> {
    pub fn new(executions: Arc<X>) -> Self {
        Self {
            executions,
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Executions matching the filter, oldest first, as API views.
    pub async fn list(
        &self,
        filter: &SequenceExecutionFilter,
    ) -> Result<Vec<SequenceExecution>, QueryError> {
        let records = with_timeout(self.store_timeout, self.executions.get(filter)).await?;
        Ok(records.iter().map(SequenceExecution::from).collect())
    }

    /// Every execution of one keptn context for a project and service,
    /// across stages.
    pub async fn for_context(
        &self,
        project: &str,
        service: &str,
        keptn_context: &str,
    ) -> Result<SequenceExecutions, QueryError> {
        let filter = SequenceExecutionFilter {
            project: Some(project.to_string()),
            service: Some(service.to_string()),
            keptn_context: Some(keptn_context.to_string()),
            ..Default::default()
        };
        let records = with_timeout(self.store_timeout, self.executions.get(&filter)).await?;
        Ok(SequenceExecutions::from_sequence_executions(&records)?)
    }
}
