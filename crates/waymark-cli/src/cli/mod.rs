//! CLI command definitions for the `waymark` binary.
//!
//! Uses clap derive macros for argument parsing. Commands operate on the
//! execution store in the data directory.

pub mod config;
pub mod definition;
pub mod execution;
pub mod format;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and administer durable workflow and saga executions.
#[derive(Parser)]
#[command(name = "waymark", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to ~/.waymark).
    #[arg(long, global = true, env = "WAYMARK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored executions.
    #[command(alias = "ls")]
    List {
        /// Only executions recovery would resume (pending, running, compensating).
        #[arg(long)]
        pending: bool,

        /// Only executions with this status.
        #[arg(long, conflicts_with = "pending")]
        status: Option<String>,
    },

    /// Show one execution with its steps.
    Show {
        /// Execution ID or unique prefix.
        id: String,
    },

    /// List the checkpoints of an execution.
    Checkpoints {
        /// Execution ID or unique prefix.
        id: String,
    },

    /// Cancel a pending or interrupted execution.
    Cancel {
        /// Execution ID or unique prefix.
        id: String,
    },

    /// Delete an execution and its checkpoints.
    #[command(alias = "rm")]
    Delete {
        /// Execution ID or unique prefix.
        id: String,

        /// Also delete executions that have not reached a terminal state.
        #[arg(long)]
        force: bool,
    },

    /// Parse and validate a saga definition file (YAML or JSON).
    Validate {
        /// Path to the definition file.
        file: PathBuf,
    },

    /// Print the effective configuration.
    Config,
}

/// Tracing filter for the requested verbosity.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,waymark_core=debug,waymark_infra=debug",
        _ => "trace",
    }
}
