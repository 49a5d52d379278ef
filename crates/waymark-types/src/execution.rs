//! Execution state: the unit of durability.
//!
//! An `ExecutionState` is created when a workflow or saga is submitted, mutated
//! step by step, and persisted after every transition. Its `steps` vector is
//! sized once from the plan and never changes length. Checkpoints are
//! append-only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::ExecutionPlan;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Cancelled,
}

impl ExecutionStatus {
    /// Statuses the recovery scanner picks up.
    pub const RESUMABLE: [ExecutionStatus; 3] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Compensating,
    ];

    pub fn is_terminal(self) -> bool {
        !self.is_resumable()
    }

    pub fn is_resumable(self) -> bool {
        Self::RESUMABLE.contains(&self)
    }

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Compensating => "compensating",
            ExecutionStatus::Compensated => "compensated",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("invalid execution status: '{s}'"))
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensated,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Rollback bookkeeping attached to a step that declares a compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    /// Type tag (workflow: the declared action type; saga: the handler node type).
    pub action_type: String,
    /// Parameters for the compensating action.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Set once the compensation has been invoked, whatever the outcome.
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl CompensationAction {
    pub fn new(action_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            params,
            executed: false,
            result: None,
            error: None,
            executed_at: None,
        }
    }
}

/// One step's progress record inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Step ID from the definition.
    pub id: String,
    /// Business node identifier (saga steps reuse the step ID).
    pub node_id: String,
    /// Business node type.
    pub node_type: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationAction>,
    /// Retries made for this step. Counts retries, not attempts: a step that
    /// succeeded first time reports 0, and attempts are always `retry_count + 1`.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionStep {
    pub fn pending(id: impl Into<String>, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            compensation: None,
            retry_count: 0,
            duration_ms: None,
        }
    }

    /// Whether the compensation executor should invoke this step's rollback.
    pub fn needs_compensation(&self) -> bool {
        self.status == StepStatus::Completed
            && self.compensation.as_ref().is_some_and(|c| !c.executed)
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Written by the engine once the step completed.
    StepCompleted,
    /// Written by a saga step through `SagaContext::checkpoint`.
    Intermediate,
}

/// Immutable record of durable progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// Step this checkpoint follows.
    pub step_id: String,
    pub step_index: usize,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    /// State snapshot (step output plus caller data).
    pub state: serde_json::Value,
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Durable state of one workflow or saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Workflow or saga identifier.
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Index of the step currently executing.
    pub current_step: usize,
    pub steps: Vec<ExecutionStep>,
    pub checkpoints: Vec<Checkpoint>,
    /// What to run; persisted so recovery can re-derive step code.
    pub plan: ExecutionPlan,
    /// Submission input.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Final output once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Total retries across all steps.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionState {
    /// Build a fresh `pending` state with one pending step per plan entry.
    pub fn new(
        workflow_id: impl Into<String>,
        plan: ExecutionPlan,
        input: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let steps = match &plan {
            ExecutionPlan::Workflow { steps } => steps
                .iter()
                .map(|s| {
                    let mut step = ExecutionStep::pending(&s.id, &s.node_id, &s.node_type);
                    step.compensation = s
                        .compensation
                        .as_ref()
                        .map(|c| CompensationAction::new(&c.action_type, c.params.clone()));
                    step
                })
                .collect(),
            ExecutionPlan::Saga { definition } => definition
                .steps
                .iter()
                .map(|s| ExecutionStep::pending(&s.id, &s.id, &s.node_type))
                .collect(),
        };

        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::now_v7(),
            status: ExecutionStatus::Pending,
            current_step: 0,
            steps,
            checkpoints: Vec::new(),
            plan,
            input,
            output: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            retry_count: 0,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the first step not covered by a step-completion checkpoint.
    ///
    /// Intermediate checkpoints do not advance the resume point: the step that
    /// wrote them has not finished and must run again.
    pub fn resume_point(&self) -> usize {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| c.kind == CheckpointKind::StepCompleted)
            .map_or(0, |c| c.step_index + 1)
    }

    /// Most recent checkpoint written for the given step, of any kind.
    pub fn latest_checkpoint_for(&self, step_index: usize) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| c.step_index == step_index)
    }

    /// Outputs of completed (or since compensated) steps keyed by step ID.
    pub fn step_results(&self) -> HashMap<String, serde_json::Value> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Compensated))
            .filter_map(|s| s.output.clone().map(|o| (s.id.clone(), o)))
            .collect()
    }

    /// Number of steps that reached `completed` (including later compensated ones).
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Compensated))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        CompensationSpec, CompensationStrategy, SagaDefinition, SagaStepDefinition, WorkflowStep,
    };
    use serde_json::json;

    fn workflow_plan() -> ExecutionPlan {
        ExecutionPlan::Workflow {
            steps: vec![
                WorkflowStep {
                    id: "fetch".to_string(),
                    node_id: "node-fetch".to_string(),
                    node_type: "http".to_string(),
                    compensation: None,
                },
                WorkflowStep {
                    id: "store".to_string(),
                    node_id: "node-store".to_string(),
                    node_type: "db.insert".to_string(),
                    compensation: Some(CompensationSpec {
                        action_type: "db.delete".to_string(),
                        params: json!({"table": "orders"}),
                    }),
                },
            ],
        }
    }

    fn checkpoint(state: &ExecutionState, index: usize, kind: CheckpointKind) -> Checkpoint {
        Checkpoint {
            id: Uuid::now_v7(),
            execution_id: state.execution_id,
            step_id: state.steps[index].id.clone(),
            step_index: index,
            kind,
            created_at: Utc::now(),
            state: json!({}),
        }
    }

    #[test]
    fn test_new_state_is_pending_with_pending_steps() {
        let state = ExecutionState::new("wf", workflow_plan(), json!({"a": 1}), HashMap::new());
        assert_eq!(state.status, ExecutionStatus::Pending);
        assert_eq!(state.current_step, 0);
        assert_eq!(state.steps.len(), 2);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(state.steps[0].compensation.is_none());
        let comp = state.steps[1].compensation.as_ref().unwrap();
        assert_eq!(comp.action_type, "db.delete");
        assert!(!comp.executed);
    }

    #[test]
    fn test_saga_steps_use_step_id_as_node_id() {
        let plan = ExecutionPlan::Saga {
            definition: SagaDefinition {
                id: "saga".to_string(),
                name: None,
                steps: vec![SagaStepDefinition {
                    id: "reserve".to_string(),
                    name: None,
                    node_type: "inventory.reserve".to_string(),
                    params: json!({}),
                    timeout_ms: None,
                    retry: None,
                }],
                compensation_strategy: CompensationStrategy::Backward,
                timeout_ms: None,
                retry: None,
            },
        };
        let state = ExecutionState::new("saga", plan, json!(null), HashMap::new());
        assert_eq!(state.steps[0].node_id, "reserve");
        assert_eq!(state.steps[0].node_type, "inventory.reserve");
    }

    #[test]
    fn test_status_terminality() {
        assert!(ExecutionStatus::Pending.is_resumable());
        assert!(ExecutionStatus::Running.is_resumable());
        assert!(ExecutionStatus::Compensating.is_resumable());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Compensated.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Compensating,
            ExecutionStatus::Compensated,
            ExecutionStatus::Cancelled,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_resume_point_ignores_intermediate_checkpoints() {
        let mut state = ExecutionState::new("wf", workflow_plan(), json!(null), HashMap::new());
        assert_eq!(state.resume_point(), 0);

        let c0 = checkpoint(&state, 0, CheckpointKind::StepCompleted);
        state.checkpoints.push(c0);
        assert_eq!(state.resume_point(), 1);

        let c1 = checkpoint(&state, 1, CheckpointKind::Intermediate);
        state.checkpoints.push(c1.clone());
        assert_eq!(state.resume_point(), 1);
        assert_eq!(state.latest_checkpoint_for(1), Some(&c1));
    }

    #[test]
    fn test_needs_compensation() {
        let mut state = ExecutionState::new("wf", workflow_plan(), json!(null), HashMap::new());
        assert!(!state.steps[1].needs_compensation());

        state.steps[1].status = StepStatus::Completed;
        assert!(state.steps[1].needs_compensation());

        state.steps[1].compensation.as_mut().unwrap().executed = true;
        assert!(!state.steps[1].needs_compensation());

        // No compensation declared
        state.steps[0].status = StepStatus::Completed;
        assert!(!state.steps[0].needs_compensation());
    }

    #[test]
    fn test_step_results_only_include_finished_steps() {
        let mut state = ExecutionState::new("wf", workflow_plan(), json!(null), HashMap::new());
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(json!({"rows": 3}));
        state.steps[1].status = StepStatus::Failed;
        state.steps[1].output = Some(json!("partial"));

        let results = state.step_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results["fetch"], json!({"rows": 3}));
        assert_eq!(state.completed_steps(), 1);
    }

    #[test]
    fn test_execution_state_json_roundtrip() {
        let mut metadata = HashMap::new();
        metadata.insert("tenant".to_string(), json!("acme"));
        let mut state = ExecutionState::new("wf", workflow_plan(), json!({"x": 1}), metadata);
        state.status = ExecutionStatus::Running;
        let cp = checkpoint(&state, 0, CheckpointKind::StepCompleted);
        state.checkpoints.push(cp);

        let json = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
