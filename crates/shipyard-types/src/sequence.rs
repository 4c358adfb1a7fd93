//! Sequence execution record and its task fan-out ledger.
//!
//! One `SequenceExecution` exists per instantiation of a shipyard sequence
//! for a `(project, stage, service, keptnContext)`. The record carries a
//! frozen snapshot of the sequence definition, the completed-task log and
//! the ledger of the task currently awaiting completion.
//!
//! The ledger maps each event source to whether it reported `.started` and
//! what it reported in `.finished`. A task resolves once every started
//! source has also finished; resolution is a pure function of the record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::{KeptnEvent, ResultType, StatusType};
use crate::payload;
use crate::scope::EventScope;
use crate::shipyard::{Sequence, Task};

/// Name of the task whose properties carry an evaluation score.
pub const EVALUATION_TASK_NAME: &str = "evaluation";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a sequence execution.
///
/// `queued -> started -> {finished | aborted | timedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceState {
    Queued,
    Started,
    Finished,
    TimedOut,
    Aborted,
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Finished | SequenceState::TimedOut | SequenceState::Aborted
        )
    }

    /// Queued or started: occupies its `(project, stage, service)` slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceState::Queued => "queued",
            SequenceState::Started => "started",
            SequenceState::Finished => "finished",
            SequenceState::TimedOut => "timedOut",
            SequenceState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SequenceState::Queued),
            "started" => Ok(SequenceState::Started),
            "finished" => Ok(SequenceState::Finished),
            "timedOut" => Ok(SequenceState::TimedOut),
            "aborted" => Ok(SequenceState::Aborted),
            other => Err(format!("invalid sequence state: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task ledger
// ---------------------------------------------------------------------------

/// What a single source reported in its `.finished` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: ResultType,
    pub status: StatusType,
    #[serde(default)]
    pub properties: Value,
}

/// Progress of one source on the current task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<TaskOutcome>,
}

/// The task currently awaiting completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionState {
    pub name: String,
    #[serde(rename = "triggeredID")]
    pub triggered_id: String,
    #[serde(default)]
    pub ledger: BTreeMap<String, SourceProgress>,
}

/// A `.started` or `.finished` report for the current task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started { source: String },
    Finished { source: String, outcome: TaskOutcome },
}

impl TaskEvent {
    pub fn source(&self) -> &str {
        match self {
            TaskEvent::Started { source } | TaskEvent::Finished { source, .. } => source,
        }
    }
}

/// Effect of a task event on the current task's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerUpdate {
    /// No current task carries the triggered id.
    NotCurrent,
    /// The ledger already held this report.
    Unchanged,
    Recorded,
}

impl LedgerUpdate {
    pub fn is_current(self) -> bool {
        self != LedgerUpdate::NotCurrent
    }
}

/// Aggregated result of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub name: String,
    #[serde(rename = "triggeredID")]
    pub triggered_id: String,
    pub result: ResultType,
    pub status: StatusType,
    #[serde(default)]
    pub properties: Value,
}

impl TaskExecutionResult {
    /// Score reported by an evaluation task under `evaluation.score`.
    pub fn evaluation_score(&self) -> Option<f64> {
        if self.name != EVALUATION_TASK_NAME {
            return None;
        }
        self.properties
            .get("evaluation")
            .and_then(|e| e.get("score"))
            .and_then(Value::as_f64)
    }
}

/// Most recent event observed for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    pub time: DateTime<Utc>,
}

impl From<&KeptnEvent> for LatestEvent {
    fn from(event: &KeptnEvent) -> Self {
        Self {
            event_type: event.event_type.clone(),
            id: event.id.clone(),
            time: event.time,
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecutionStatus {
    pub state: SequenceState,
    #[serde(default)]
    pub previous_tasks: Vec<TaskExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskExecutionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecution {
    pub id: Uuid,
    pub sequence: Sequence,
    pub status: SequenceExecutionStatus,
    pub scope: EventScope,
    #[serde(default)]
    pub input_properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<LatestEvent>,
    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: i64,
    pub triggered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceExecution {
    /// A new, queued execution.
    pub fn new(sequence: Sequence, scope: EventScope, input_properties: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            sequence,
            status: SequenceExecutionStatus {
                state: SequenceState::Queued,
                previous_tasks: Vec::new(),
                current_task: None,
            },
            scope,
            input_properties,
            latest_event: None,
            version: 0,
            triggered_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SequenceState {
        self.status.state
    }

    pub fn current_triggered_id(&self) -> Option<&str> {
        self.status
            .current_task
            .as_ref()
            .map(|t| t.triggered_id.as_str())
    }

    /// Next task to run. Duplicate task names are allowed, so the position
    /// in the completed log decides.
    pub fn next_task(&self) -> Option<&Task> {
        self.sequence.tasks.get(self.status.previous_tasks.len())
    }

    /// Make `name` the current task awaiting completion and mark the
    /// execution started.
    pub fn start_task(&mut self, name: &str, triggered_id: &str) {
        self.status.state = SequenceState::Started;
        self.status.current_task = Some(TaskExecutionState {
            name: name.to_string(),
            triggered_id: triggered_id.to_string(),
            ledger: BTreeMap::new(),
        });
    }

    /// Record a task event in the ledger.
    ///
    /// Duplicate reports from the same source leave the ledger untouched;
    /// the first `.finished` report of a source wins.
    pub fn apply_task_event(&mut self, triggered_id: &str, event: &TaskEvent) -> LedgerUpdate {
        let Some(task) = self.status.current_task.as_mut() else {
            return LedgerUpdate::NotCurrent;
        };
        if task.triggered_id != triggered_id {
            return LedgerUpdate::NotCurrent;
        }

        let progress = task.ledger.entry(event.source().to_string()).or_default();
        let changed = match event {
            TaskEvent::Started { .. } => !std::mem::replace(&mut progress.started, true),
            TaskEvent::Finished { outcome, .. } => {
                if progress.finished.is_none() {
                    progress.finished = Some(outcome.clone());
                    true
                } else {
                    false
                }
            }
        };
        if changed {
            LedgerUpdate::Recorded
        } else {
            LedgerUpdate::Unchanged
        }
    }

    /// Whether every source that started the current task has finished it.
    ///
    /// A task with no finished report is never resolved.
    pub fn is_current_task_resolved(&self) -> bool {
        let Some(task) = &self.status.current_task else {
            return false;
        };
        let any_finished = task.ledger.values().any(|p| p.finished.is_some());
        let all_started_finished = task
            .ledger
            .values()
            .filter(|p| p.started)
            .all(|p| p.finished.is_some());
        any_finished && all_started_finished
    }

    /// Aggregate the current task's ledger into the completed-task log.
    ///
    /// Result and status are the worst across all finished sources;
    /// properties are merged in source order.
    pub fn complete_current_task(&mut self) -> Option<TaskExecutionResult> {
        let task = self.status.current_task.take()?;

        let mut result = ResultType::Pass;
        let mut status = StatusType::Succeeded;
        let mut properties = Value::Object(Default::default());
        for outcome in task.ledger.values().filter_map(|p| p.finished.as_ref()) {
            result = result.worst(outcome.result);
            status = status.worst(outcome.status);
            payload::merge(&mut properties, &outcome.properties);
        }

        let completed = TaskExecutionResult {
            name: task.name,
            triggered_id: task.triggered_id,
            result,
            status,
            properties,
        };
        self.status.previous_tasks.push(completed.clone());
        Some(completed)
    }

    /// Worst result and status across all completed tasks.
    pub fn aggregated_outcome(&self) -> (ResultType, StatusType) {
        self.status.previous_tasks.iter().fold(
            (ResultType::Pass, StatusType::Succeeded),
            |(result, status), task| (result.worst(task.result), status.worst(task.status)),
        )
    }

    /// Payload of the next task's triggered event.
    ///
    /// Input properties merged with every completed task's output, with
    /// outcome fields removed, the task's own shipyard properties nested
    /// under its name and the scope fields set.
    pub fn next_task_payload(&self, task: &Task) -> Value {
        let mut data = self.accumulated_properties();

        if let Some(properties) = &task.properties {
            let mut nested = serde_json::Map::new();
            nested.insert(task.name.clone(), properties.clone());
            payload::merge(&mut data, &Value::Object(nested));
        }

        payload::set_str(&mut data, "project", &self.scope.project);
        payload::set_str(&mut data, "stage", &self.scope.stage);
        payload::set_str(&mut data, "service", &self.scope.service);
        data
    }

    /// Input properties merged with every completed task's output, minus
    /// outcome fields.
    pub fn accumulated_properties(&self) -> Value {
        let mut data = if self.input_properties.is_object() {
            self.input_properties.clone()
        } else {
            Value::Object(Default::default())
        };
        for previous in &self.status.previous_tasks {
            payload::merge(&mut data, &previous.properties);
        }
        payload::strip_outcome_fields(&mut data);
        data
    }

    /// Enter a terminal state.
    pub fn finish(&mut self, state: SequenceState) {
        self.status.state = state;
        self.status.current_task = None;
    }

    pub fn record_event(&mut self, event: &KeptnEvent) {
        self.latest_event = Some(LatestEvent::from(event));
    }
}
