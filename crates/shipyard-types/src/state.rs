//! Sequence state view: per keptn context, the overall state and the
//! progress of each stage the context has reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::ResultType;
use crate::sequence::{LatestEvent, SequenceExecution, SequenceState};

/// Overall state of a keptn context across its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallState {
    Started,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvaluation {
    pub result: ResultType,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStateStage {
    pub name: String,
    pub state: SequenceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<LatestEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_evaluation: Option<StageEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStateView {
    /// Name of the sequence that opened the context.
    pub name: String,
    pub project: String,
    pub service: String,
    pub shkeptncontext: String,
    pub state: OverallState,
    pub time: DateTime<Utc>,
    pub stages: Vec<SequenceStateStage>,
}

impl SequenceStateView {
    /// Build the view of one keptn context. Returns `None` for an empty slice.
    ///
    /// Stages are ordered by when their execution was triggered; parallel
    /// stages appear side by side.
    pub fn from_executions(executions: &[SequenceExecution]) -> Option<Self> {
        let mut ordered: Vec<&SequenceExecution> = executions.iter().collect();
        ordered.sort_by_key(|e| e.triggered_at);
        let first = ordered.first()?;

        let state = if ordered.iter().any(|e| e.state().is_active()) {
            OverallState::Started
        } else {
            OverallState::Finished
        };

        let stages = ordered
            .iter()
            .map(|execution| SequenceStateStage {
                name: execution.scope.stage.clone(),
                state: execution.state(),
                latest_event: execution.latest_event.clone(),
                latest_evaluation: execution
                    .status
                    .previous_tasks
                    .iter()
                    .rev()
                    .find_map(|task| {
                        task.evaluation_score().map(|score| StageEvaluation {
                            result: task.result,
                            score,
                        })
                    }),
            })
            .collect();

        Some(Self {
            name: first.sequence.name.clone(),
            project: first.scope.project.clone(),
            service: first.scope.service.clone(),
            shkeptncontext: first.scope.keptn_context.clone(),
            state,
            time: first.triggered_at,
            stages,
        })
    }
}

/// A page of sequence state views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStates {
    pub states: Vec<SequenceStateView>,
    pub total_count: usize,
}
