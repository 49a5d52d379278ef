//! Context handed to saga step handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use waymark_types::execution::Checkpoint;

use super::checkpoint::{CheckpointError, CheckpointSink};

/// Per-invocation view of a saga execution.
///
/// Carries the results of earlier steps keyed by step ID, the execution's
/// shared metadata, and checkpoint helpers scoped to the current step.
#[derive(Clone)]
pub struct SagaContext {
    execution_id: Uuid,
    saga_id: String,
    step_id: String,
    step_index: usize,
    input: Value,
    results: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    checkpoints: Arc<dyn CheckpointSink>,
}

impl SagaContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: Uuid,
        saga_id: impl Into<String>,
        step_id: impl Into<String>,
        step_index: usize,
        input: Value,
        results: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
        checkpoints: Arc<dyn CheckpointSink>,
    ) -> Self {
        Self {
            execution_id,
            saga_id: saga_id.into(),
            step_id: step_id.into(),
            step_index,
            input,
            results,
            metadata,
            checkpoints,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// The saga's submission input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Outputs of the steps that completed before this one.
    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    /// Output of an earlier step by ID.
    pub fn result(&self, step_id: &str) -> Option<&Value> {
        self.results.get(step_id)
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Durably record progress inside the current step.
    ///
    /// The data comes back from [`SagaContext::get_checkpoint`] if the step is
    /// re-run after a crash.
    pub async fn checkpoint(&self, data: Value) -> Result<Checkpoint, CheckpointError> {
        self.checkpoints.write(self.step_index, data).await
    }

    /// Latest checkpoint recorded for the current step, if any.
    pub async fn get_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints.latest(self.step_index).await
    }

    /// Data passed to the latest [`SagaContext::checkpoint`] call for this step.
    pub async fn checkpoint_data(&self) -> Option<Value> {
        self.get_checkpoint()
            .await
            .and_then(|cp| cp.state.get("data").cloned())
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("execution_id", &self.execution_id)
            .field("saga_id", &self.saga_id)
            .field("step_id", &self.step_id)
            .field("step_index", &self.step_index)
            .field("results", &self.results.len())
            .finish_non_exhaustive()
    }
}
