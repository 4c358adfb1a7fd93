//! Query-side view of sequence executions.
//!
//! Decouples the persisted record from what the API returns: ledgers and
//! task properties are hidden, evaluation scores are lifted out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SequenceExecutionsError;
use crate::event::{ResultType, StatusType};
use crate::scope::EventScope;
use crate::sequence::{SequenceExecution as SequenceExecutionRecord, SequenceState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionState {
    pub name: String,
    #[serde(rename = "triggeredID")]
    pub triggered_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTaskResult {
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionResult {
    pub name: String,
    #[serde(rename = "triggeredID")]
    pub triggered_id: String,
    pub result: ResultType,
    pub status: StatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_result: Option<EvaluationTaskResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub state: SequenceState,
    pub timestamp: DateTime<Utc>,
    pub previous_tasks: Vec<TaskExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskExecutionState>,
}

/// One execution as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecution {
    pub sequence_name: String,
    pub status: ExecutionStatus,
    pub scope: EventScope,
}

impl From<&SequenceExecutionRecord> for SequenceExecution {
    fn from(record: &SequenceExecutionRecord) -> Self {
        let previous_tasks = record
            .status
            .previous_tasks
            .iter()
            .map(|task| TaskExecutionResult {
                name: task.name.clone(),
                triggered_id: task.triggered_id.clone(),
                result: task.result,
                status: task.status,
                evaluation_result: task
                    .evaluation_score()
                    .map(|score| EvaluationTaskResult { score }),
            })
            .collect();

        let current_task = record
            .status
            .current_task
            .as_ref()
            .map(|task| TaskExecutionState {
                name: task.name.clone(),
                triggered_id: task.triggered_id.clone(),
            });

        Self {
            sequence_name: record.sequence.name.clone(),
            status: ExecutionStatus {
                state: record.status.state,
                timestamp: record.updated_at,
                previous_tasks,
                current_task,
            },
            scope: record.scope.clone(),
        }
    }
}

/// Executions sharing one keptn context, project and service (stages vary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecutions {
    pub scope: EventScope,
    pub sequence_executions: Vec<SequenceExecution>,
}

impl SequenceExecutions {
    pub fn from_sequence_executions(
        executions: &[SequenceExecutionRecord],
    ) -> Result<Self, SequenceExecutionsError> {
        let first = executions.first().ok_or(SequenceExecutionsError::Empty)?;

        let same_scope = executions.iter().all(|e| {
            e.scope.keptn_context == first.scope.keptn_context
                && e.scope.project == first.scope.project
                && e.scope.service == first.scope.service
        });
        if !same_scope {
            return Err(SequenceExecutionsError::ScopeMismatch);
        }

        Ok(Self {
            scope: EventScope {
                project: first.scope.project.clone(),
                service: first.scope.service.clone(),
                keptn_context: first.scope.keptn_context.clone(),
                ..Default::default()
            },
            sequence_executions: executions.iter().map(SequenceExecution::from).collect(),
        })
    }
}
