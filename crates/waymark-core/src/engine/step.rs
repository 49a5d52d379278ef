//! Step execution seams.
//!
//! Two kinds of user code run inside an execution:
//!
//! - [`StepExecutor`]: the injected callback that runs linear workflow nodes
//!   by `(node_type, node_id, input)` and performs their declared compensations.
//! - [`SagaStep`]: a handler registered per `node_type` that runs saga steps
//!   with a [`SagaContext`] and may roll them back.
//!
//! Both traits use RPITIT. The `*Dyn` companions with boxed futures and a
//! blanket impl make them storable behind `Arc<dyn ...>` in the engine.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use waymark_types::definition::SagaStepDefinition;
use waymark_types::execution::{CompensationAction, ExecutionStep};

use super::context::SagaContext;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The step's code reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The step did not finish within its time bound.
    #[error("step timed out after {0} ms")]
    Timeout(u64),

    /// No handler is registered for the step's node type. Never retried.
    #[error("no handler registered for node type '{0}'")]
    UnknownHandler(String),
}

impl StepError {
    /// Shorthand for [`StepError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// StepExecutor (linear workflows)
// ---------------------------------------------------------------------------

/// External callback that executes linear workflow nodes.
pub trait StepExecutor: Send + Sync {
    /// Run one node and return its output.
    fn execute(
        &self,
        node_type: &str,
        node_id: &str,
        input: Value,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;

    /// Run the compensation declared on a completed step.
    ///
    /// `step.output` holds what `execute` returned for it.
    fn compensate(
        &self,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;
}

/// Object-safe version of [`StepExecutor`] with boxed futures.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        node_type: &'a str,
        node_id: &'a str,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;

    fn compensate_boxed<'a>(
        &'a self,
        step: &'a ExecutionStep,
        action: &'a CompensationAction,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        node_type: &'a str,
        node_id: &'a str,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.execute(node_type, node_id, input))
    }

    fn compensate_boxed<'a>(
        &'a self,
        step: &'a ExecutionStep,
        action: &'a CompensationAction,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.compensate(step, action))
    }
}

/// Type-erased step executor held by the engine.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(&self, node_type: &str, node_id: &str, input: Value) -> Result<Value, StepError> {
        self.inner.execute_boxed(node_type, node_id, input).await
    }

    pub async fn compensate(
        &self,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> Result<Value, StepError> {
        self.inner.compensate_boxed(step, action).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SagaStep (saga handlers)
// ---------------------------------------------------------------------------

/// Code behind one saga `node_type`.
///
/// Handlers are looked up by node type at run time, so the same handler
/// serves every saga step (and every recovered execution) of that type.
pub trait SagaStep: Send + Sync {
    /// Run the step. `input` is the saga's submission input; earlier results
    /// are available through `ctx.results()`.
    fn execute(
        &self,
        ctx: &SagaContext,
        step: &SagaStepDefinition,
        input: Value,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;

    /// Undo a completed step. `output` is what `execute` returned.
    fn compensate(
        &self,
        ctx: &SagaContext,
        step: &SagaStepDefinition,
        output: Option<Value>,
    ) -> impl Future<Output = Result<(), StepError>> + Send {
        let _ = (ctx, step, output);
        async { Ok(()) }
    }

    /// Whether completed steps of this type carry a compensation.
    fn has_compensation(&self) -> bool {
        false
    }
}

/// Object-safe version of [`SagaStep`].
pub trait SagaStepDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a SagaContext,
        step: &'a SagaStepDefinition,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;

    fn compensate_boxed<'a>(
        &'a self,
        ctx: &'a SagaContext,
        step: &'a SagaStepDefinition,
        output: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

    fn has_compensation(&self) -> bool;
}

impl<T: SagaStep> SagaStepDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a SagaContext,
        step: &'a SagaStepDefinition,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, step, input))
    }

    fn compensate_boxed<'a>(
        &'a self,
        ctx: &'a SagaContext,
        step: &'a SagaStepDefinition,
        output: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(self.compensate(ctx, step, output))
    }

    fn has_compensation(&self) -> bool {
        SagaStep::has_compensation(self)
    }
}
