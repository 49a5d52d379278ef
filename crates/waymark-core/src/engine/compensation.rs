//! Compensation executor.
//!
//! Rolls back the completed steps of an execution in the order given by a
//! [`CompensationStrategy`]. Each eligible step is claimed (its action marked
//! `executed` and persisted) before its code runs, so a compensation is invoked
//! at most once even across restarts. Failures are recorded on the action and
//! published as `compensation:failed`; they never stop the remaining steps.
//!
//! The state lock is never held while compensation code runs.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use waymark_types::definition::CompensationStrategy;
use waymark_types::error::RepositoryError;
use waymark_types::event::EngineEvent;
use waymark_types::execution::{CompensationAction, ExecutionState, ExecutionStep, StepStatus};

use super::step::StepError;
use crate::event::EventBus;
use crate::repository::ExecutionRepository;

/// Runs the compensation code for one step.
pub trait CompensationInvoker: Send + Sync {
    /// `step` and `action` are snapshots taken when the step was claimed.
    /// The returned value, if any, is stored as the action's result.
    fn invoke(
        &self,
        step_index: usize,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> impl Future<Output = Result<Option<Value>, StepError>> + Send;
}

/// Outcome of one compensation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Step IDs compensated successfully, in completion order.
    pub compensated: Vec<String>,
    /// Step IDs whose compensation failed.
    pub failed: Vec<String>,
}

impl CompensationReport {
    pub fn compensated_count(&self) -> u32 {
        u32::try_from(self.compensated.len()).unwrap_or(u32::MAX)
    }
}

enum Outcome {
    Compensated(String),
    Failed(String),
    Skipped,
}

/// Executes compensations and records their outcomes in `R`.
pub struct CompensationExecutor<R: ExecutionRepository> {
    repo: Arc<R>,
    events: EventBus,
}

impl<R: ExecutionRepository> CompensationExecutor<R> {
    pub fn new(repo: Arc<R>, events: EventBus) -> Self {
        Self { repo, events }
    }

    /// Compensate every eligible step of `state` using `strategy`.
    ///
    /// Returns an error only if the store rejects a write.
    pub async fn compensate<I: CompensationInvoker>(
        &self,
        state: &Arc<Mutex<ExecutionState>>,
        strategy: CompensationStrategy,
        invoker: &I,
    ) -> Result<CompensationReport, RepositoryError> {
        let (execution_id, eligible) = {
            let guard = state.lock().await;
            let eligible: Vec<usize> = guard
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.needs_compensation())
                .map(|(i, _)| i)
                .collect();
            (guard.execution_id, eligible)
        };

        tracing::info!(
            execution_id = %execution_id,
            strategy = ?strategy,
            steps = eligible.len(),
            "starting compensation"
        );

        let outcomes = match strategy {
            CompensationStrategy::Backward => {
                let mut outcomes = Vec::with_capacity(eligible.len());
                for &index in eligible.iter().rev() {
                    outcomes.push(self.compensate_step(state, index, invoker).await?);
                }
                outcomes
            }
            CompensationStrategy::Forward => {
                let mut outcomes = Vec::with_capacity(eligible.len());
                for &index in &eligible {
                    outcomes.push(self.compensate_step(state, index, invoker).await?);
                }
                outcomes
            }
            CompensationStrategy::Parallel => {
                let results = join_all(
                    eligible
                        .iter()
                        .map(|&index| self.compensate_step(state, index, invoker)),
                )
                .await;
                results.into_iter().collect::<Result<Vec<_>, _>>()?
            }
        };

        let mut report = CompensationReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Compensated(id) => report.compensated.push(id),
                Outcome::Failed(id) => report.failed.push(id),
                Outcome::Skipped => {}
            }
        }
        Ok(report)
    }

    async fn compensate_step<I: CompensationInvoker>(
        &self,
        state: &Arc<Mutex<ExecutionState>>,
        index: usize,
        invoker: &I,
    ) -> Result<Outcome, RepositoryError> {
        // Claim
        let (execution_id, step, action) = {
            let mut guard = state.lock().await;
            let execution_id = guard.execution_id;
            let Some(step) = guard.steps.get_mut(index) else {
                return Ok(Outcome::Skipped);
            };
            if !step.needs_compensation() {
                return Ok(Outcome::Skipped);
            }
            {
                let Some(action) = step.compensation.as_mut() else {
                    return Ok(Outcome::Skipped);
                };
                action.executed = true;
                action.executed_at = Some(Utc::now());
            }
            let step = step.clone();
            let Some(action) = step.compensation.clone() else {
                return Ok(Outcome::Skipped);
            };
            self.repo.save_state(&guard).await?;
            (execution_id, step, action)
        };

        let result = invoker.invoke(index, &step, &action).await;

        let mut guard = state.lock().await;
        let outcome = {
            let entry = &mut guard.steps[index];
            match &result {
                Ok(value) => {
                    entry.status = StepStatus::Compensated;
                    if let Some(action) = entry.compensation.as_mut() {
                        action.result = value.clone();
                        action.error = None;
                    }
                    Outcome::Compensated(entry.id.clone())
                }
                Err(e) => {
                    if let Some(action) = entry.compensation.as_mut() {
                        action.error = Some(e.to_string());
                    }
                    Outcome::Failed(entry.id.clone())
                }
            }
        };
        self.repo.save_state(&guard).await?;
        drop(guard);

        match result {
            Ok(_) => {
                tracing::info!(execution_id = %execution_id, step_id = %step.id, "step compensated");
                self.events.publish(EngineEvent::StepCompensated {
                    execution_id,
                    step_id: step.id.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    error = %e,
                    "compensation failed"
                );
                self.events.publish(EngineEvent::CompensationFailed {
                    execution_id,
                    step_id: step.id.clone(),
                    error: e.to_string(),
                });
            }
        }

        Ok(outcome)
    }
}
