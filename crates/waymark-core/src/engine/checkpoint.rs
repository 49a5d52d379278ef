//! Checkpoint manager.
//!
//! Appends an immutable checkpoint to the execution state and persists the
//! checkpoint together with the state through
//! [`ExecutionRepository::commit_checkpoint`]. The orchestrator does not start
//! step `i + 1` until the checkpoint for step `i` has been committed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;
use waymark_types::error::RepositoryError;
use waymark_types::event::EngineEvent;
use waymark_types::execution::{Checkpoint, CheckpointKind, ExecutionState};

use crate::event::EventBus;
use crate::repository::ExecutionRepository;

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("step index {index} out of range for execution with {len} steps")]
    StepOutOfRange { index: usize, len: usize },

    #[error("failed to persist checkpoint: {0}")]
    Persistence(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Writes checkpoints for executions stored in `R`.
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: Arc<R>,
    events: EventBus,
}

impl<R: ExecutionRepository> Clone for CheckpointManager<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            events: self.events.clone(),
        }
    }
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>, events: EventBus) -> Self {
        Self { repo, events }
    }

    /// Record that `state.steps[step_index]` completed.
    ///
    /// The snapshot holds the step output; saga executions also get every
    /// result produced so far under `results`.
    pub async fn checkpoint_step(
        &self,
        state: &mut ExecutionState,
        step_index: usize,
    ) -> Result<Checkpoint, CheckpointError> {
        let step = state
            .steps
            .get(step_index)
            .ok_or(CheckpointError::StepOutOfRange {
                index: step_index,
                len: state.steps.len(),
            })?;

        let mut snapshot = json!({ "output": step.output.clone().unwrap_or(Value::Null) });
        if state.plan.is_saga() {
            snapshot["results"] = json!(state.step_results());
        }

        self.append(state, step_index, CheckpointKind::StepCompleted, snapshot)
            .await
    }

    /// Record caller data for a step that is still running.
    pub async fn checkpoint_intermediate(
        &self,
        state: &mut ExecutionState,
        step_index: usize,
        data: Value,
    ) -> Result<Checkpoint, CheckpointError> {
        if step_index >= state.steps.len() {
            return Err(CheckpointError::StepOutOfRange {
                index: step_index,
                len: state.steps.len(),
            });
        }
        self.append(state, step_index, CheckpointKind::Intermediate, json!({ "data": data }))
            .await
    }

    async fn append(
        &self,
        state: &mut ExecutionState,
        step_index: usize,
        kind: CheckpointKind,
        snapshot: Value,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint {
            id: Uuid::now_v7(),
            execution_id: state.execution_id,
            step_id: state.steps[step_index].id.clone(),
            step_index,
            kind,
            created_at: Utc::now(),
            state: snapshot,
        };

        state.checkpoints.push(checkpoint.clone());
        if let Err(e) = self.repo.commit_checkpoint(&checkpoint, state).await {
            // Keep memory in line with the store.
            state.checkpoints.pop();
            return Err(e.into());
        }

        tracing::debug!(
            execution_id = %checkpoint.execution_id,
            step_id = %checkpoint.step_id,
            checkpoint_id = %checkpoint.id,
            kind = ?kind,
            "checkpoint committed"
        );

        self.events.publish(EngineEvent::CheckpointCreated {
            execution_id: checkpoint.execution_id,
            checkpoint_id: checkpoint.id,
            step_id: checkpoint.step_id.clone(),
        });

        Ok(checkpoint)
    }
}

// ---------------------------------------------------------------------------
// CheckpointSink
// ---------------------------------------------------------------------------

/// Object-safe checkpoint access handed to saga steps through their context.
pub trait CheckpointSink: Send + Sync {
    /// Write an intermediate checkpoint for `step_index`.
    fn write(
        &self,
        step_index: usize,
        data: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Checkpoint, CheckpointError>> + Send + '_>>;

    /// Latest checkpoint of any kind for `step_index`.
    fn latest(&self, step_index: usize) -> Pin<Box<dyn Future<Output = Option<Checkpoint>> + Send + '_>>;
}

/// Sink bound to one live execution state.
pub struct StateCheckpointSink<R: ExecutionRepository> {
    manager: CheckpointManager<R>,
    state: Arc<Mutex<ExecutionState>>,
}

impl<R: ExecutionRepository> StateCheckpointSink<R> {
    pub fn new(manager: CheckpointManager<R>, state: Arc<Mutex<ExecutionState>>) -> Self {
        Self { manager, state }
    }
}

impl<R: ExecutionRepository + 'static> CheckpointSink for StateCheckpointSink<R> {
    fn write(
        &self,
        step_index: usize,
        data: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Checkpoint, CheckpointError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.manager
                .checkpoint_intermediate(&mut state, step_index, data)
                .await
        })
    }

    fn latest(&self, step_index: usize) -> Pin<Box<dyn Future<Output = Option<Checkpoint>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.latest_checkpoint_for(step_index).cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::repository::InMemoryExecutionRepository;
    use waymark_types::definition::{
        CompensationStrategy, ExecutionPlan, SagaDefinition, SagaStepDefinition, WorkflowStep,
    };
    use waymark_types::execution::StepStatus;

    fn workflow_state() -> ExecutionState {
        let plan = ExecutionPlan::Workflow {
            steps: vec![WorkflowStep {
                id: "only".to_string(),
                node_id: "node-only".to_string(),
                node_type: "noop".to_string(),
                compensation: None,
            }],
        };
        ExecutionState::new("wf", plan, json!(null), HashMap::new())
    }

    fn saga_state() -> ExecutionState {
        let step = |id: &str| SagaStepDefinition {
            id: id.to_string(),
            name: None,
            node_type: "noop".to_string(),
            params: json!({}),
            timeout_ms: None,
            retry: None,
        };
        let plan = ExecutionPlan::Saga {
            definition: SagaDefinition {
                id: "saga".to_string(),
                name: None,
                steps: vec![step("a"), step("b")],
                compensation_strategy: CompensationStrategy::Backward,
                timeout_ms: None,
                retry: None,
            },
        };
        ExecutionState::new("saga", plan, json!(null), HashMap::new())
    }

    fn manager(repo: &InMemoryExecutionRepository) -> (CheckpointManager<InMemoryExecutionRepository>, EventBus) {
        let bus = EventBus::new(16);
        (CheckpointManager::new(Arc::new(repo.clone()), bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_step_checkpoint_persists_state_and_emits() {
        let repo = InMemoryExecutionRepository::new();
        let (mgr, bus) = manager(&repo);
        let mut rx = bus.subscribe();

        let mut state = workflow_state();
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(json!({"rows": 2}));

        let cp = mgr.checkpoint_step(&mut state, 0).await.unwrap();
        assert_eq!(cp.kind, CheckpointKind::StepCompleted);
        assert_eq!(cp.state, json!({"output": {"rows": 2}}));
        assert_eq!(state.checkpoints, vec![cp.clone()]);

        let stored = repo.load_state(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.checkpoints, vec![cp.clone()]);
        assert_eq!(repo.load_checkpoints(&state.execution_id).await.unwrap(), vec![cp.clone()]);
        assert_eq!(stored.resume_point(), 1);

        match rx.recv().await.unwrap() {
            EngineEvent::CheckpointCreated { checkpoint_id, step_id, .. } => {
                assert_eq!(checkpoint_id, cp.id);
                assert_eq!(step_id, "only");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_saga_checkpoint_includes_results() {
        let repo = InMemoryExecutionRepository::new();
        let (mgr, _bus) = manager(&repo);

        let mut state = saga_state();
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(json!("reserved"));

        let cp = mgr.checkpoint_step(&mut state, 0).await.unwrap();
        assert_eq!(cp.state["output"], "reserved");
        assert_eq!(cp.state["results"], json!({"a": "reserved"}));
    }

    #[tokio::test]
    async fn test_intermediate_checkpoint_does_not_move_resume_point() {
        let repo = InMemoryExecutionRepository::new();
        let (mgr, _bus) = manager(&repo);
        let mut state = saga_state();

        let cp = mgr
            .checkpoint_intermediate(&mut state, 1, json!({"page": 3}))
            .await
            .unwrap();
        assert_eq!(cp.kind, CheckpointKind::Intermediate);
        assert_eq!(cp.state, json!({"data": {"page": 3}}));
        assert_eq!(state.resume_point(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_rejected() {
        let repo = InMemoryExecutionRepository::new();
        let (mgr, _bus) = manager(&repo);
        let mut state = workflow_state();

        let err = mgr.checkpoint_step(&mut state, 3).await.unwrap_err();
        assert!(matches!(err, CheckpointError::StepOutOfRange { index: 3, len: 1 }));
        let err = mgr
            .checkpoint_intermediate(&mut state, 1, json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::StepOutOfRange { .. }));
        assert!(state.checkpoints.is_empty());
    }

    #[tokio::test]
    async fn test_sink_writes_through_shared_state() {
        let repo = InMemoryExecutionRepository::new();
        let (mgr, _bus) = manager(&repo);
        let state = Arc::new(Mutex::new(saga_state()));
        let sink = StateCheckpointSink::new(mgr, Arc::clone(&state));

        assert!(sink.latest(0).await.is_none());
        let cp = sink.write(0, json!("halfway")).await.unwrap();
        assert_eq!(sink.latest(0).await, Some(cp.clone()));
        assert_eq!(state.lock().await.checkpoints.len(), 1);

        let id = state.lock().await.execution_id;
        assert_eq!(repo.load_checkpoints(&id).await.unwrap(), vec![cp]);
    }
}
