//! Workflow and saga definitions.
//!
//! Definitions are plain data. The code that runs a step is looked up at run
//! time: linear workflow steps go through the injected step executor, saga
//! steps through the handler registered for their `node_type`. Because of this,
//! the definition is persisted inside each execution's [`ExecutionPlan`] and a
//! restarted engine can resume the execution without the original caller.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Linear workflows
// ---------------------------------------------------------------------------

/// One node of a linear workflow pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step ID, unique within the workflow.
    pub id: String,
    /// Business node identifier passed to the step executor.
    pub node_id: String,
    /// Business node type passed to the step executor.
    pub node_type: String,
    /// Rollback descriptor, if the node declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationSpec>,
}

/// Declared rollback for a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationSpec {
    /// Type tag understood by the step executor (e.g. "refund").
    pub action_type: String,
    /// Free-form parameters for the compensating action.
    #[serde(default)]
    pub params: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Sagas
// ---------------------------------------------------------------------------

/// Order in which compensations run after a saga step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    /// Reverse completion order.
    #[default]
    Backward,
    /// Original step order.
    Forward,
    /// All compensations concurrently.
    Parallel,
}

/// A saga: ordered steps with optional compensations and shared policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDefinition {
    /// Saga identifier (used as the execution's `workflow_id`).
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ordered steps.
    pub steps: Vec<SagaStepDefinition>,
    /// Rollback ordering.
    #[serde(default)]
    pub compensation_strategy: CompensationStrategy,
    /// Default step timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Default retry policy for steps without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// One step of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStepDefinition {
    /// Step ID, unique within the saga. Prior results are keyed by it.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Handler lookup key.
    pub node_type: String,
    /// Parameters handed to the handler on execute and compensate.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Step-level timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Step-level retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl SagaStepDefinition {
    /// Display name, falling back to the step ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// What an execution runs. Persisted with the execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionPlan {
    /// Linear pipeline driven by the external step executor.
    Workflow { steps: Vec<WorkflowStep> },
    /// Saga driven by registered step handlers.
    Saga { definition: SagaDefinition },
}

impl ExecutionPlan {
    pub fn is_saga(&self) -> bool {
        matches!(self, ExecutionPlan::Saga { .. })
    }

    /// Number of steps in the plan.
    pub fn len(&self) -> usize {
        match self {
            ExecutionPlan::Workflow { steps } => steps.len(),
            ExecutionPlan::Saga { definition } => definition.steps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compensation ordering: sagas carry their own, linear workflows always roll back backward.
    pub fn compensation_strategy(&self) -> CompensationStrategy {
        match self {
            ExecutionPlan::Workflow { .. } => CompensationStrategy::Backward,
            ExecutionPlan::Saga { definition } => definition.compensation_strategy,
        }
    }
}
