//! Engine event types.
//!
//! `EngineEvent` is broadcast on every observable transition of an execution.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.
//! [`EngineEvent::name`] returns the stable `noun:verb` name integrations key on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A linear workflow finished every step.
    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: String,
        output: serde_json::Value,
        duration_ms: u64,
    },

    /// A linear workflow step exhausted its retries.
    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: String,
        step_id: String,
        error: String,
    },

    /// An execution was cancelled by the caller.
    ExecutionCancelled { execution_id: Uuid },

    /// The recovery scanner picked up an interrupted execution.
    ExecutionRecovering {
        execution_id: Uuid,
        workflow_id: String,
    },

    /// An interrupted execution re-entered the step loop.
    ExecutionResumed {
        execution_id: Uuid,
        workflow_id: String,
        /// Index of the first step that will run.
        resume_from: usize,
    },

    /// A saga finished every step.
    SagaCompleted {
        execution_id: Uuid,
        saga_id: String,
        output: serde_json::Value,
        duration_ms: u64,
    },

    /// A saga failed and its compensations have run.
    SagaCompensated {
        execution_id: Uuid,
        saga_id: String,
        error: String,
        compensated_steps: u32,
    },

    /// A step failed and will be retried after `delay_ms`.
    StepRetry {
        execution_id: Uuid,
        step_id: String,
        /// 1-based number of the retry about to happen.
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// A step's compensation ran successfully.
    StepCompensated { execution_id: Uuid, step_id: String },

    /// A step's compensation failed. Rollback continues with the next step.
    CompensationFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// A checkpoint was durably written.
    CheckpointCreated {
        execution_id: Uuid,
        checkpoint_id: Uuid,
        step_id: String,
    },

    /// Resuming an interrupted execution failed.
    RecoveryFailed { execution_id: Uuid, error: String },
}

impl EngineEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ExecutionCompleted { .. } => "execution:completed",
            EngineEvent::ExecutionFailed { .. } => "execution:failed",
            EngineEvent::ExecutionCancelled { .. } => "execution:cancelled",
            EngineEvent::ExecutionRecovering { .. } => "execution:recovering",
            EngineEvent::ExecutionResumed { .. } => "execution:resumed",
            EngineEvent::SagaCompleted { .. } => "saga:completed",
            EngineEvent::SagaCompensated { .. } => "saga:compensated",
            EngineEvent::StepRetry { .. } => "step:retry",
            EngineEvent::StepCompensated { .. } => "step:compensated",
            EngineEvent::CompensationFailed { .. } => "compensation:failed",
            EngineEvent::CheckpointCreated { .. } => "checkpoint:created",
            EngineEvent::RecoveryFailed { .. } => "recovery:failed",
        }
    }

    /// Execution the event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::ExecutionCompleted { execution_id, .. }
            | EngineEvent::ExecutionFailed { execution_id, .. }
            | EngineEvent::ExecutionCancelled { execution_id }
            | EngineEvent::ExecutionRecovering { execution_id, .. }
            | EngineEvent::ExecutionResumed { execution_id, .. }
            | EngineEvent::SagaCompleted { execution_id, .. }
            | EngineEvent::SagaCompensated { execution_id, .. }
            | EngineEvent::StepRetry { execution_id, .. }
            | EngineEvent::StepCompensated { execution_id, .. }
            | EngineEvent::CompensationFailed { execution_id, .. }
            | EngineEvent::CheckpointCreated { execution_id, .. }
            | EngineEvent::RecoveryFailed { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let id = Uuid::nil();
        let cases = [
            (EngineEvent::ExecutionCancelled { execution_id: id }, "execution:cancelled"),
            (
                EngineEvent::StepRetry {
                    execution_id: id,
                    step_id: "s".to_string(),
                    attempt: 1,
                    delay_ms: 100,
                    error: "boom".to_string(),
                },
                "step:retry",
            ),
            (
                EngineEvent::CompensationFailed {
                    execution_id: id,
                    step_id: "s".to_string(),
                    error: "boom".to_string(),
                },
                "compensation:failed",
            ),
            (
                EngineEvent::RecoveryFailed {
                    execution_id: id,
                    error: "boom".to_string(),
                },
                "recovery:failed",
            ),
        ];
        for (event, name) in cases {
            assert_eq!(event.name(), name);
            assert_eq!(event.execution_id(), id);
        }
    }

    #[test]
    fn test_event_serde_tagged() {
        let event = EngineEvent::CheckpointCreated {
            execution_id: Uuid::nil(),
            checkpoint_id: Uuid::nil(),
            step_id: "charge".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "checkpoint_created");
        assert_eq!(json["step_id"], "charge");

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
