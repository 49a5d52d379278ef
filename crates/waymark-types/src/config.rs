//! Engine configuration types.
//!
//! `WaymarkConfig` is the top-level `config.toml`; the `[engine]` table maps to
//! [`EngineConfig`]. All fields have defaults, so an empty file is valid.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaymarkConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Database URL override (defaults to `{data_dir}/waymark.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Runtime settings for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between periodic recovery sweeps.
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    /// Saga step timeout used when neither the step nor the saga sets one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Retry policy for workflow steps and saga steps without their own.
    #[serde(default)]
    pub default_retry: RetryPolicy,
}

fn default_recovery_interval_secs() -> u64 {
    30
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recovery_interval_secs: default_recovery_interval_secs(),
            default_step_timeout_ms: default_step_timeout_ms(),
            event_capacity: default_event_capacity(),
            default_retry: RetryPolicy::default(),
        }
    }
}
