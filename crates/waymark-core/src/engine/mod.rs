//! Durable execution engine.
//!
//! - [`Engine`] (orchestrator): drives linear workflows and sagas.
//! - [`retry`]: backoff calculation and retry eligibility.
//! - [`CheckpointManager`]: commits a checkpoint after every completed step.
//! - [`CompensationExecutor`]: backward, forward or parallel rollback.
//! - [`Engine::recover`]: finds interrupted executions and resumes them.
//! - [`definition`]: saga parsing and validation.

pub mod checkpoint;
pub mod compensation;
pub mod context;
pub mod definition;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

use uuid::Uuid;
use waymark_types::error::RepositoryError;

pub use checkpoint::{CheckpointError, CheckpointManager, CheckpointSink};
pub use compensation::{CompensationExecutor, CompensationInvoker, CompensationReport};
pub use context::SagaContext;
pub use definition::DefinitionError;
pub use orchestrator::{Engine, EngineBuilder};
pub use recovery::RecoveryReport;
pub use step::{BoxStepExecutor, SagaStep, StepError, StepExecutor};

/// Errors returned by [`Engine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A step exhausted its retries. Compensation has already run.
    #[error("step '{step_id}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        #[source]
        source: StepError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("execution {0} was cancelled")]
    Cancelled(Uuid),

    #[error("execution {0} is still running")]
    ExecutionActive(Uuid),

    #[error("cannot resume execution {execution_id}: {reason}")]
    RecoveryUnavailable { execution_id: Uuid, reason: String },

    #[error("no step executor configured")]
    NoStepExecutor,
}

impl EngineError {
    /// The underlying step error, if a step failed.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            EngineError::StepFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
