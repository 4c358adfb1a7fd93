//! Controller configuration.
//!
//! Deserialized from `config.toml` in the data directory. Every field has
//! a default, so a partial (or empty) file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Seconds between sequence dispatcher ticks.
    #[serde(default = "default_sequence_dispatch_interval_secs")]
    pub sequence_dispatch_interval_secs: u64,

    /// Seconds between event dispatcher ticks.
    #[serde(default = "default_event_dispatch_interval_secs")]
    pub event_dispatch_interval_secs: u64,

    /// Upper bound for a single store call.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// Start without write leadership.
    #[serde(default)]
    pub read_only: bool,

    /// Capacity of the outbound event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `<project>/shipyard.yaml` files.
    #[serde(default)]
    pub shipyard_dir: Option<PathBuf>,

    /// Export spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub enable_otel: bool,
}

fn default_sequence_dispatch_interval_secs() -> u64 {
    10
}

fn default_event_dispatch_interval_secs() -> u64 {
    10
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sequence_dispatch_interval_secs: default_sequence_dispatch_interval_secs(),
            event_dispatch_interval_secs: default_event_dispatch_interval_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            read_only: false,
            event_bus_capacity: default_event_bus_capacity(),
            host: default_host(),
            port: default_port(),
            shipyard_dir: None,
            enable_otel: false,
        }
    }
}

impl ControllerConfig {
    pub fn sequence_dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.sequence_dispatch_interval_secs.max(1))
    }

    pub fn event_dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.event_dispatch_interval_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs.max(1))
    }
}
