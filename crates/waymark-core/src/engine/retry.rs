//! Retry/backoff calculation.
//!
//! Pure functions over a [`RetryPolicy`]; the orchestrator owns the loop, the
//! sleeps and the `step:retry` events. Attempt indices are 0-based: the delay
//! before the first retry is `calculate_delay(policy, 0)`.

use std::time::Duration;

use waymark_types::retry::{BackoffType, DEFAULT_MAX_DELAY_MS, RetryPolicy};

use super::step::StepError;

/// Delay before retry number `attempt + 1`.
///
/// - `fixed`: `initial`
/// - `linear`: `initial * (attempt + 1)`
/// - `exponential`: `min(initial * 2^attempt, max_delay)`
///
/// Arithmetic saturates, so very large attempt indices clamp instead of
/// overflowing.
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let initial = policy.initial_delay_ms;
    let millis = match policy.backoff {
        BackoffType::Fixed => initial,
        BackoffType::Linear => initial.saturating_mul(u64::from(attempt).saturating_add(1)),
        BackoffType::Exponential => {
            let cap = policy.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS);
            let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
            initial.saturating_mul(factor).min(cap)
        }
    };
    Duration::from_millis(millis)
}

/// Whether a step that has already been retried `retries_made` times should
/// be retried again after failing with `error`.
pub fn should_retry(policy: &RetryPolicy, retries_made: u32, error: &StepError) -> bool {
    if retries_made >= policy.max_retries {
        return false;
    }
    if matches!(error, StepError::UnknownHandler(_)) {
        return false;
    }
    if policy.retryable_errors.is_empty() {
        return true;
    }
    let message = error.to_string();
    policy
        .retryable_errors
        .iter()
        .any(|pattern| message.contains(pattern.as_str()))
}
