//! Mirrors engine events into `tracing` records.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::Level;
use waymark_types::event::EngineEvent;

/// Log level an event is recorded at.
pub fn event_level(event: &EngineEvent) -> Level {
    match event {
        EngineEvent::RecoveryFailed { .. } => Level::ERROR,
        EngineEvent::ExecutionFailed { .. }
        | EngineEvent::SagaCompensated { .. }
        | EngineEvent::StepRetry { .. }
        | EngineEvent::CompensationFailed { .. } => Level::WARN,
        EngineEvent::CheckpointCreated { .. } => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Record one event with its name and execution ID as fields.
pub fn log_event(event: &EngineEvent) {
    let name = event.name();
    let execution_id = event.execution_id();
    let detail = detail(event);
    let level = event_level(event);
    if level == Level::ERROR {
        tracing::error!(event = name, %execution_id, detail = %detail, "engine event");
    } else if level == Level::WARN {
        tracing::warn!(event = name, %execution_id, detail = %detail, "engine event");
    } else if level == Level::DEBUG {
        tracing::debug!(event = name, %execution_id, detail = %detail, "engine event");
    } else {
        tracing::info!(event = name, %execution_id, detail = %detail, "engine event");
    }
}

fn detail(event: &EngineEvent) -> String {
    match event {
        EngineEvent::ExecutionCompleted { duration_ms, .. }
        | EngineEvent::SagaCompleted { duration_ms, .. } => format!("took {duration_ms} ms"),
        EngineEvent::ExecutionFailed { step_id, error, .. } => format!("step {step_id}: {error}"),
        EngineEvent::ExecutionResumed { resume_from, .. } => format!("from step {resume_from}"),
        EngineEvent::SagaCompensated {
            error,
            compensated_steps,
            ..
        } => format!("{compensated_steps} step(s) compensated after: {error}"),
        EngineEvent::StepRetry {
            step_id,
            attempt,
            delay_ms,
            error,
            ..
        } => format!("step {step_id} retry {attempt} in {delay_ms} ms: {error}"),
        EngineEvent::StepCompensated { step_id, .. }
        | EngineEvent::CheckpointCreated { step_id, .. } => format!("step {step_id}"),
        EngineEvent::CompensationFailed { step_id, error, .. } => format!("step {step_id}: {error}"),
        EngineEvent::RecoveryFailed { error, .. } => error.clone(),
        EngineEvent::ExecutionCancelled { .. } | EngineEvent::ExecutionRecovering { .. } => {
            String::new()
        }
    }
}

/// Drain `receiver` into [`log_event`] until the bus closes.
///
/// Returns the number of events logged. Lagged events are reported once per
/// gap and skipped.
pub fn spawn_event_logger(mut receiver: broadcast::Receiver<EngineEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0u64;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    log_event(&event);
                    logged += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}
