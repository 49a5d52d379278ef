//! Retry policy types.
//!
//! The delay arithmetic lives in `waymark-core::engine::retry`; this module only
//! holds the serializable policy that travels with definitions and config.

use serde::{Deserialize, Serialize};

/// Delay cap applied to exponential backoff when a policy sets no `max_delay_ms`.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

/// Retry configuration for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (so `max_retries + 1` attempts in total).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff curve.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffType,
    /// Base delay in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for exponential backoff (defaults to 60 s when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Substrings of error messages that are worth retrying. Empty means every
    /// step error is retryable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> BackoffType {
    BackoffType::Exponential
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: default_backoff(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: Some(DEFAULT_MAX_DELAY_MS),
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}
