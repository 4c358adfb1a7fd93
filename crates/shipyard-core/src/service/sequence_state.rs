//! Per-context sequence state views.

use std::sync::Arc;
use std::time::Duration;

use shipyard_types::sequence::SequenceExecution;
use shipyard_types::state::{SequenceStateView, SequenceStates};

use super::QueryError;
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::repository::with_timeout;

pub struct SequenceStateService<X: SequenceExecutionRepository> {
    executions: Arc<X>,
    store_timeout: Duration,
}

impl<X: SequenceExecutionRepository> SequenceStateService<X> {
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

    /// One view per keptn context of `project`, most recent first.
    pub async fn get_states(
        &self,
        project: &str,
        keptn_context: Option<&str>,
    ) -> Result<SequenceStates, QueryError> {
        if project.is_empty() {
            return Err(QueryError::Validation("project must not be empty".to_string()));
        }
        let filter = SequenceExecutionFilter {
            project: Some(project.to_string()),
            keptn_context: keptn_context.map(str::to_string),
            ..Default::default()
        };
        let records = with_timeout(self.store_timeout, self.executions.get(&filter)).await?;

        let mut states: Vec<SequenceStateView> = group_by_context(records)
            .iter()
            .filter_map(|group| SequenceStateView::from_executions(group))
            .collect();
        states.sort_by(|a, b| b.time.cmp(&a.time));

        Ok(SequenceStates {
            total_count: states.len(),
            states,
        })
    }
}

/// Group records by keptn context, keeping first-seen order.
fn group_by_context(records: Vec<SequenceExecution>) -> Vec<Vec<SequenceExecution>> {
    let mut groups: Vec<Vec<SequenceExecution>> = Vec::new();
    for record in records {
        let existing = groups
            .iter_mut()
            .find(|g| g[0].scope.keptn_context == record.scope.keptn_context);
        match existing {
            Some(group) => group.push(record),
            None => groups.push(vec![record]),
        }
    }
    groups
}
