//! Shipyard: the declarative pipeline definition of a project.
//!
//! A shipyard lists ordered stages, each with named sequences of tasks.
//! Sequences may declare `triggeredOn` rules that start them when another
//! sequence finishes. The model is parsed from YAML and validated before
//! the controller consumes it.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ShipyardError;
use crate::event::{EVENT_TYPE_PREFIX, ResultType};

/// Group prefix of the supported `apiVersion` values.
pub const SHIPYARD_API_GROUP: &str = "spec.keptn.sh/";

/// The only accepted `kind`.
pub const SHIPYARD_KIND: &str = "Shipyard";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipyard {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ShipyardMetadata,
    pub spec: ShipyardSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipyardMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipyardSpec {
    #[serde(default)]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

/// A named, ordered list of tasks. Snapshotted into every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_on: Vec<Trigger>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_after: Option<String>,
}

impl Task {
    /// Delay before the task's triggered event may be sent.
    pub fn delay(&self) -> Option<Duration> {
        self.triggered_after.as_deref().and_then(|d| parse_delay(d).ok())
    }
}

/// Cross-sequence trigger rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Finished event of another sequence, e.g. `dev.delivery.finished`.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, rename = "match")]
    pub match_fields: BTreeMap<String, String>,
}

impl Trigger {
    fn references(&self, finished_type: &str) -> bool {
        let event = self.event.strip_prefix(EVENT_TYPE_PREFIX).unwrap_or(&self.event);
        event == finished_type
    }

    /// Evaluate the rule's selector against finished event data.
    ///
    /// Without a selector the rule only fires for non-failed results.
    pub fn matches(&self, finished_data: &Value) -> bool {
        match &self.selector {
            Some(selector) if !selector.match_fields.is_empty() => {
                selector.match_fields.iter().all(|(key, expected)| {
                    match finished_data.get(key) {
                        Some(Value::String(actual)) => actual == expected,
                        Some(other) => other.to_string() == *expected,
                        None => false,
                    }
                })
            }
            _ => {
                let result = finished_data
                    .get("result")
                    .and_then(Value::as_str)
                    .and_then(|r| r.parse::<ResultType>().ok());
                result != Some(ResultType::Failed)
            }
        }
    }
}

/// A sequence selected by a trigger rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredSequence {
    pub stage: String,
    pub sequence: String,
}

impl Shipyard {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.spec.stages.iter().find(|s| s.name == name)
    }

    pub fn sequence(&self, stage: &str, sequence: &str) -> Option<&Sequence> {
        self.stage(stage)?.sequences.iter().find(|s| s.name == sequence)
    }

    /// Sequences whose `triggeredOn` rules fire for the finished event of
    /// `<stage>.<sequence>` carrying `finished_data`.
    ///
    /// Every matching rule is returned, across all stages, in definition order.
    pub fn sequences_triggered_by(
        &self,
        stage: &str,
        sequence: &str,
        finished_data: &Value,
    ) -> Vec<TriggeredSequence> {
        let finished_type = format!("{stage}.{sequence}.finished");
        let mut triggered = Vec::new();

        for candidate_stage in &self.spec.stages {
            for candidate in &candidate_stage.sequences {
                let fires = candidate
                    .triggered_on
                    .iter()
                    .any(|t| t.references(&finished_type) && t.matches(finished_data));
                if fires {
                    triggered.push(TriggeredSequence {
                        stage: candidate_stage.name.clone(),
                        sequence: candidate.name.clone(),
                    });
                }
            }
        }
        triggered
    }
}

// ---------------------------------------------------------------------------
// Parsing and validation
// ---------------------------------------------------------------------------

/// Parse a shipyard YAML document and validate it.
pub fn parse_shipyard(yaml: &str) -> Result<Shipyard, ShipyardError> {
    let shipyard: Shipyard =
        serde_yaml_ng::from_str(yaml).map_err(|e| ShipyardError::Parse(e.to_string()))?;
    validate_shipyard(&shipyard)?;
    Ok(shipyard)
}

/// Check structural constraints of a shipyard.
///
/// Checks:
/// - `apiVersion` is `spec.keptn.sh/0.2.x`
/// - `kind` is `Shipyard`
/// - at least one stage, stage names non-empty and unique
/// - sequence names non-empty and unique within a stage
/// - task names non-empty, `triggeredAfter` parseable
pub fn validate_shipyard(shipyard: &Shipyard) -> Result<(), ShipyardError> {
    let version = shipyard
        .api_version
        .strip_prefix(SHIPYARD_API_GROUP)
        .ok_or_else(|| {
            ShipyardError::Invalid(format!("unsupported apiVersion '{}'", shipyard.api_version))
        })?;
    let version = semver::Version::parse(version.trim_start_matches('v')).map_err(|e| {
        ShipyardError::Invalid(format!("invalid apiVersion '{}': {e}", shipyard.api_version))
    })?;
    let supported = semver::VersionReq::parse("~0.2").map_err(|e| ShipyardError::Invalid(e.to_string()))?;
    if !supported.matches(&version) {
        return Err(ShipyardError::Invalid(format!(
            "unsupported apiVersion '{}'",
            shipyard.api_version
        )));
    }

    if shipyard.kind != SHIPYARD_KIND {
        return Err(ShipyardError::Invalid(format!(
            "kind must be '{SHIPYARD_KIND}', got '{}'",
            shipyard.kind
        )));
    }

    if shipyard.spec.stages.is_empty() {
        return Err(ShipyardError::Invalid("shipyard must define at least one stage".to_string()));
    }

    let mut stage_names = HashSet::new();
    for stage in &shipyard.spec.stages {
        if stage.name.is_empty() {
            return Err(ShipyardError::Invalid("stage name must not be empty".to_string()));
        }
        if !stage_names.insert(stage.name.as_str()) {
            return Err(ShipyardError::Invalid(format!("duplicate stage '{}'", stage.name)));
        }

        let mut sequence_names = HashSet::new();
        for sequence in &stage.sequences {
            if sequence.name.is_empty() {
                return Err(ShipyardError::Invalid(format!(
                    "stage '{}' has a sequence without a name",
                    stage.name
                )));
            }
            if !sequence_names.insert(sequence.name.as_str()) {
                return Err(ShipyardError::Invalid(format!(
                    "duplicate sequence '{}' in stage '{}'",
                    sequence.name, stage.name
                )));
            }
            for task in &sequence.tasks {
                if task.name.is_empty() {
                    return Err(ShipyardError::Invalid(format!(
                        "sequence '{}' in stage '{}' has a task without a name",
                        sequence.name, stage.name
                    )));
                }
                if let Some(delay) = &task.triggered_after {
                    parse_delay(delay).map_err(|e| {
                        ShipyardError::Invalid(format!("task '{}': {e}", task.name))
                    })?;
                }
            }
        }
    }

    Ok(())
}

/// Parse a delay such as `30s`, `5m`, `1h` or `2d`.
pub fn parse_delay(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("delay '{input}' has no unit"))?;
    let (amount, unit) = input.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("delay '{input}' has no amount"))?;

    let secs = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86_400,
        other => return Err(format!("unknown delay unit '{other}'")),
    };
    Ok(Duration::from_secs(secs))
}
