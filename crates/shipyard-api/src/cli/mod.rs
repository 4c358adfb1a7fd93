//! CLI command definitions for the `shipyard-controller` binary.

pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sequence orchestration service for Keptn-style shipyards.
#[derive(Parser)]
#[command(name = "shipyard-controller", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Only log errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller with its REST API.
    Serve(ServeArgs),

    /// Parse and validate a shipyard file.
    Validate {
        /// Path to the shipyard YAML file.
        file: PathBuf,
    },
}

/// Flags for `serve`. Every flag overrides the matching `config.toml` value.
#[derive(Debug, Default, clap::Args)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "SHIPYARD_HOST")]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "SHIPYARD_PORT")]
    pub port: Option<u16>,

    /// Data directory holding the database and config.toml.
    #[arg(long, env = "SHIPYARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory holding `<project>/shipyard.yaml` files.
    #[arg(long, env = "SHIPYARD_SHIPYARD_DIR")]
    pub shipyard_dir: Option<PathBuf>,

    /// Start without write leadership.
    #[arg(long)]
    pub read_only: bool,

    /// Export spans to OpenTelemetry (stdout exporter).
    #[arg(long)]
    pub otel: bool,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,shipyard=debug",
            _ => "trace",
        }
    }
}
