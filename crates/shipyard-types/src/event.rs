//! Lifecycle events exchanged with the rest of the system.
//!
//! Every event follows the CloudEvents-like shape used on the message bus:
//! `{id, type, source, time, shkeptncontext, triggeredid, gitcommitid, data}`.
//! Event types follow the grammar
//!
//! - `sh.keptn.event.<stage>.<sequence>.<kind>` for sequence-level events, and
//! - `sh.keptn.event.<task>.<kind>` for task-level events,
//!
//! where `<kind>` is one of `triggered`, `started`, `finished`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EventTypeError;

/// Prefix shared by every lifecycle event type.
pub const EVENT_TYPE_PREFIX: &str = "sh.keptn.event.";

/// Source attached to every event emitted by the controller.
pub const CONTROLLER_SOURCE: &str = "shipyard-controller";

/// CloudEvents spec version stamped on emitted events.
pub const SPEC_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Event kind
// ---------------------------------------------------------------------------

/// The lifecycle phase an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Triggered,
    Started,
    Finished,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Triggered => "triggered",
            EventKind::Started => "started",
            EventKind::Finished => "finished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triggered" => Ok(EventKind::Triggered),
            "started" => Ok(EventKind::Started),
            "finished" => Ok(EventKind::Finished),
            other => Err(format!("invalid event kind: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Status / result
// ---------------------------------------------------------------------------

/// Execution status reported by a task or sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    #[default]
    Succeeded,
    Unknown,
    Aborted,
    Errored,
}

impl StatusType {
    fn severity(&self) -> u8 {
        match self {
            StatusType::Succeeded => 0,
            StatusType::Unknown => 1,
            StatusType::Aborted => 2,
            StatusType::Errored => 3,
        }
    }

    /// Returns the more severe of the two statuses.
    pub fn worst(self, other: StatusType) -> StatusType {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusType::Succeeded => write!(f, "succeeded"),
            StatusType::Unknown => write!(f, "unknown"),
            StatusType::Aborted => write!(f, "aborted"),
            StatusType::Errored => write!(f, "errored"),
        }
    }
}

impl FromStr for StatusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "succeeded" => Ok(StatusType::Succeeded),
            "unknown" => Ok(StatusType::Unknown),
            "aborted" => Ok(StatusType::Aborted),
            "errored" => Ok(StatusType::Errored),
            other => Err(format!("invalid status: '{other}'")),
        }
    }
}

/// Quality result reported by a task or sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    #[default]
    Pass,
    Warning,
    #[serde(rename = "fail")]
    Failed,
}

impl ResultType {
    fn severity(&self) -> u8 {
        match self {
            ResultType::Pass => 0,
            ResultType::Warning => 1,
            ResultType::Failed => 2,
        }
    }

    /// Returns the more severe of the two results.
    pub fn worst(self, other: ResultType) -> ResultType {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Pass => write!(f, "pass"),
            ResultType::Warning => write!(f, "warning"),
            ResultType::Failed => write!(f, "fail"),
        }
    }
}

impl FromStr for ResultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pass" => Ok(ResultType::Pass),
            "warning" => Ok(ResultType::Warning),
            "fail" | "failed" => Ok(ResultType::Failed),
            other => Err(format!("invalid result: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Event type grammar
// ---------------------------------------------------------------------------

/// A parsed event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// `<stage>.<sequence>.<kind>`
    Sequence {
        stage: String,
        sequence: String,
        kind: EventKind,
    },
    /// `<task>.<kind>`
    Task { task: String, kind: EventKind },
}

impl EventType {
    /// Parse a full event type such as `sh.keptn.event.dev.delivery.triggered`.
    pub fn parse(event_type: &str) -> Result<Self, EventTypeError> {
        let rest = event_type
            .strip_prefix(EVENT_TYPE_PREFIX)
            .ok_or_else(|| EventTypeError::MissingPrefix(event_type.to_string()))?;

        let parts: Vec<&str> = rest.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(EventTypeError::Malformed(event_type.to_string()));
        }

        let kind = parts
            .last()
            .and_then(|k| k.parse::<EventKind>().ok())
            .ok_or_else(|| EventTypeError::UnknownKind(event_type.to_string()))?;

        match parts.as_slice() {
            [task, _] => Ok(EventType::Task {
                task: task.to_string(),
                kind,
            }),
            [stage, sequence, _] => Ok(EventType::Sequence {
                stage: stage.to_string(),
                sequence: sequence.to_string(),
                kind,
            }),
            _ => Err(EventTypeError::Malformed(event_type.to_string())),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventType::Sequence { kind, .. } | EventType::Task { kind, .. } => *kind,
        }
    }
}

/// Build `sh.keptn.event.<name>.<kind>`.
pub fn event_type(name: &str, kind: EventKind) -> String {
    format!("{EVENT_TYPE_PREFIX}{name}.{kind}")
}

pub fn triggered_event_type(name: &str) -> String {
    event_type(name, EventKind::Triggered)
}

/// Build the type of a sequence-level event, e.g. `sh.keptn.event.dev.delivery.finished`.
pub fn sequence_event_type(stage: &str, sequence: &str, kind: EventKind) -> String {
    event_type(&format!("{stage}.{sequence}"), kind)
}

// ---------------------------------------------------------------------------
// KeptnEvent
// ---------------------------------------------------------------------------

/// A lifecycle event as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeptnEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub shkeptncontext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub triggeredid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gitcommitid: String,
    #[serde(default)]
    pub data: Value,
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

impl KeptnEvent {
    /// Create a controller-sourced event with a fresh id.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.into(),
            source: CONTROLLER_SOURCE.to_string(),
            specversion: default_spec_version(),
            time: Utc::now(),
            shkeptncontext: String::new(),
            triggeredid: String::new(),
            gitcommitid: String::new(),
            data,
        }
    }

    pub fn with_context(mut self, keptn_context: impl Into<String>) -> Self {
        self.shkeptncontext = keptn_context.into();
        self
    }

    pub fn with_triggered_id(mut self, triggered_id: impl Into<String>) -> Self {
        self.triggeredid = triggered_id.into();
        self
    }

    pub fn with_git_commit_id(mut self, git_commit_id: impl Into<String>) -> Self {
        self.gitcommitid = git_commit_id.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Parse this event's type.
    pub fn parsed_type(&self) -> Result<EventType, EventTypeError> {
        EventType::parse(&self.event_type)
    }

    /// Typed view of the common payload fields.
    pub fn event_data(&self) -> EventData {
        EventData::from_value(&self.data)
    }
}

// ---------------------------------------------------------------------------
// EventData
// ---------------------------------------------------------------------------

/// The payload fields every event carries.
///
/// Parsed leniently: empty strings and unknown status/result values read as
/// absent instead of failing the whole event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventData {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let non_empty = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        };

        Self {
            project: text("project"),
            stage: text("stage"),
            service: text("service"),
            status: non_empty("status").and_then(|s| s.parse().ok()),
            result: non_empty("result").and_then(|s| s.parse().ok()),
            message: non_empty("message").map(str::to_string),
        }
    }

    /// Serialize into a JSON object.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
