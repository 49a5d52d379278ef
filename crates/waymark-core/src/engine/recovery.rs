//! Recovery scanner.
//!
//! A sweep asks the store for every execution in `pending`, `running` or
//! `compensating`, skips the ones this engine is already driving, and resumes
//! the rest in background tasks:
//!
//! - execution resumes one past the most recent step-completion checkpoint;
//!   steps from there on that were persisted as `running` are reset to `pending`
//! - a `compensating` execution resumes compensation; actions that already ran
//!   are not invoked again
//! - an execution whose code cannot be found (no step executor, or a saga
//!   node type without a registered handler) is reported with
//!   `recovery:failed` and left untouched in the store
//!
//! Per-execution failures never stop the sweep.

use tokio::sync::Mutex;
use uuid::Uuid;
use waymark_types::definition::ExecutionPlan;
use waymark_types::event::EngineEvent;
use waymark_types::execution::{ExecutionState, ExecutionStatus, StepStatus};

use super::EngineError;
use super::orchestrator::{Engine, RunningExecution};
use crate::repository::ExecutionRepository;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Executions handed to a background task.
    pub resumed: Vec<Uuid>,
    /// Executions that could not be resumed (`recovery:failed` was published).
    pub failed: Vec<Uuid>,
    /// Executions already running here, or no longer resumable when loaded.
    pub skipped: Vec<Uuid>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.resumed.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl<R: ExecutionRepository + 'static> Engine<R> {
    /// Run one recovery sweep.
    ///
    /// Returns once every resumable execution has been handed to its own task;
    /// it does not wait for them to finish.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let ids = self.inner.repo.list_pending_executions().await?;
        let mut report = RecoveryReport::default();
        if !ids.is_empty() {
            tracing::info!(candidates = ids.len(), "recovery sweep");
        }

        for execution_id in ids {
            if self.is_running(&execution_id) {
                report.skipped.push(execution_id);
                continue;
            }

            let state = match self.inner.repo.load_state(&execution_id).await {
                Ok(Some(state)) if state.status.is_resumable() => state,
                Ok(_) => {
                    report.skipped.push(execution_id);
                    continue;
                }
                Err(e) => {
                    self.report_failure(execution_id, &e.to_string());
                    report.failed.push(execution_id);
                    continue;
                }
            };

            self.inner.events.publish(EngineEvent::ExecutionRecovering {
                execution_id,
                workflow_id: state.workflow_id.clone(),
            });

            if let Err(e) = self.check_resumable(&state) {
                self.report_failure(execution_id, &e.to_string());
                report.failed.push(execution_id);
                continue;
            }

            let resume_from = state.resume_point().min(state.steps.len());
            let workflow_id = state.workflow_id.clone();
            let exec = match self.inner.running.entry(execution_id) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    report.skipped.push(execution_id);
                    continue;
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let exec = RunningExecution::new(reset_interrupted_steps(state, resume_from));
                    slot.insert(exec.clone());
                    exec
                }
            };

            tracing::info!(
                execution_id = %execution_id,
                workflow_id = %workflow_id,
                resume_from,
                "resuming execution"
            );
            self.inner.events.publish(EngineEvent::ExecutionResumed {
                execution_id,
                workflow_id,
                resume_from,
            });
            report.resumed.push(execution_id);

            let engine = self.clone();
            tokio::spawn(async move { engine.resume(exec, resume_from).await });
        }

        Ok(report)
    }

    async fn resume(&self, exec: RunningExecution, resume_from: usize) {
        let (execution_id, status, plan) = snapshot(&exec.state).await;

        let result = if status == ExecutionStatus::Compensating {
            self.close_failed(&exec, &plan).await.map(|_| ())
        } else {
            match self.drive(&exec, resume_from).await {
                // Step failures and cancellation are ordinary outcomes here.
                Ok(_) | Err(EngineError::StepFailed { .. }) | Err(EngineError::Cancelled(_)) => Ok(()),
                Err(e) => Err(e),
            }
        };
        self.inner.running.remove(&execution_id);

        if let Err(e) = result {
            self.report_failure(execution_id, &e.to_string());
        }
    }

    fn check_resumable(&self, state: &ExecutionState) -> Result<(), EngineError> {
        let reason = match &state.plan {
            ExecutionPlan::Workflow { .. } if self.inner.executor.is_none() => {
                Some("no step executor configured".to_string())
            }
            ExecutionPlan::Workflow { .. } => None,
            ExecutionPlan::Saga { definition } => {
                let mut missing: Vec<&str> = definition
                    .steps
                    .iter()
                    .map(|s| s.node_type.as_str())
                    .filter(|node_type| !self.has_handler(node_type))
                    .collect();
                missing.sort_unstable();
                missing.dedup();
                (!missing.is_empty())
                    .then(|| format!("no handler registered for node type(s): {}", missing.join(", ")))
            }
        };

        match reason {
            Some(reason) => Err(EngineError::RecoveryUnavailable {
                execution_id: state.execution_id,
                reason,
            }),
            None => Ok(()),
        }
    }

    fn report_failure(&self, execution_id: Uuid, error: &str) {
        tracing::error!(execution_id = %execution_id, error, "recovery failed");
        self.inner.events.publish(EngineEvent::RecoveryFailed {
            execution_id,
            error: error.to_string(),
        });
    }
}

async fn snapshot(state: &Mutex<ExecutionState>) -> (Uuid, ExecutionStatus, ExecutionPlan) {
    let state = state.lock().await;
    (state.execution_id, state.status, state.plan.clone())
}

/// Steps at or after the resume point never finished; run them again.
fn reset_interrupted_steps(mut state: ExecutionState, resume_from: usize) -> ExecutionState {
    for step in state.steps.iter_mut().skip(resume_from) {
        if step.status == StepStatus::Running {
            step.status = StepStatus::Pending;
            step.started_at = None;
        }
    }
    state
}
