//! Sequence execution store trait definition.
//!
//! Mutation of a single record is serialized by the store, not by a lock
//! in the process: task events are appended atomically and whole-record
//! updates are compare-and-swap on the record version.

use shipyard_types::error::RepositoryError;
use shipyard_types::sequence::{LatestEvent, SequenceExecution, SequenceState, TaskEvent};
use uuid::Uuid;

/// Filter for execution lookups. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceExecutionFilter {
    pub id: Option<Uuid>,
    pub project: Option<String>,
    pub stage: Option<String>,
    pub service: Option<String>,
    pub keptn_context: Option<String>,
    pub sequence_name: Option<String>,
    /// Triggered id of the task currently awaiting completion.
    pub current_triggered_id: Option<String>,
    /// Any of these states; empty means all.
    pub states: Vec<SequenceState>,
}

impl SequenceExecutionFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Whether an execution satisfies the filter.
    pub fn matches(&self, execution: &SequenceExecution) -> bool {
        let scope = &execution.scope;
        self.id.is_none_or(|id| execution.id == id)
            && self.project.as_deref().is_none_or(|p| scope.project == p)
            && self.stage.as_deref().is_none_or(|s| scope.stage == s)
            && self.service.as_deref().is_none_or(|s| scope.service == s)
            && self
                .keptn_context
                .as_deref()
                .is_none_or(|c| scope.keptn_context == c)
            && self
                .sequence_name
                .as_deref()
                .is_none_or(|n| execution.sequence.name == n)
            && self
                .current_triggered_id
                .as_deref()
                .is_none_or(|t| execution.current_triggered_id() == Some(t))
            && (self.states.is_empty() || self.states.contains(&execution.state()))
    }
}

/// Repository trait for sequence execution persistence.
pub trait SequenceExecutionRepository: Send + Sync {
    /// Executions matching the filter, ordered by trigger time.
    fn get(
        &self,
        filter: &SequenceExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<SequenceExecution>, RepositoryError>> + Send;

    /// Insert a new execution.
    ///
    /// Fails with [`RepositoryError::Conflict`] when another queued or
    /// started execution occupies the same `(project, stage, service)`.
    fn insert(
        &self,
        execution: &SequenceExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically record a task event on the execution whose current task
    /// carries `triggered_id`.
    ///
    /// Returns the updated record, or `None` when no execution matches.
    /// A report the ledger already holds is not written and leaves the
    /// version unchanged.
    fn append_task_event(
        &self,
        triggered_id: &str,
        event: &TaskEvent,
        latest_event: &LatestEvent,
    ) -> impl std::future::Future<Output = Result<Option<SequenceExecution>, RepositoryError>> + Send;

    /// Replace a record if its stored version still equals `execution.version`.
    ///
    /// On success the stored version is incremented and `true` returned;
    /// `false` means another writer got there first.
    fn update(
        &self,
        execution: &SequenceExecution,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete a single execution. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every execution of a project. Returns the number removed.
    fn clear(
        &self,
        project: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
