//! Execution orchestrator.
//!
//! [`Engine`] drives linear workflows and sagas from submission to a terminal
//! state. Every transition is persisted before the next one starts:
//!
//! 1. Validate the definition and persist the state as `pending`.
//! 2. Persist `running`, then for each step: mark it `running`, invoke it with
//!    retry, record the output and commit a checkpoint.
//! 3. On success persist `completed`. On exhausted retries run compensation
//!    (`failed -> compensating -> compensated` for linear workflows,
//!    `compensating -> compensated` for sagas) and return the step error.
//!
//! Cancellation is cooperative: the in-flight step finishes, no further step
//! starts, and no compensation runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waymark_types::config::EngineConfig;
use waymark_types::definition::{ExecutionPlan, SagaDefinition, WorkflowStep};
use waymark_types::event::EngineEvent;
use waymark_types::execution::{
    CompensationAction, ExecutionState, ExecutionStatus, ExecutionStep, StepStatus,
};
use waymark_types::retry::RetryPolicy;

use super::EngineError;
use super::checkpoint::{CheckpointManager, StateCheckpointSink};
use super::compensation::{CompensationExecutor, CompensationInvoker, CompensationReport};
use super::context::SagaContext;
use super::definition::{validate_saga, validate_workflow_steps};
use super::retry;
use super::step::{BoxStepExecutor, SagaStep, SagaStepDyn, StepError, StepExecutor};
use crate::event::EventBus;
use crate::repository::ExecutionRepository;

// ---------------------------------------------------------------------------
// Running executions
// ---------------------------------------------------------------------------

/// Live handle to an execution this engine is currently driving.
#[derive(Clone)]
pub(super) struct RunningExecution {
    pub(super) state: Arc<Mutex<ExecutionState>>,
    pub(super) cancel: CancellationToken,
}

impl RunningExecution {
    pub(super) fn new(state: ExecutionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            cancel: CancellationToken::new(),
        }
    }
}

enum LoopOutcome {
    Completed,
    Cancelled,
    Failed {
        step_id: String,
        attempts: u32,
        error: StepError,
    },
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(super) struct EngineInner<R: ExecutionRepository> {
    pub(super) repo: Arc<R>,
    pub(super) events: EventBus,
    pub(super) config: EngineConfig,
    pub(super) checkpoints: CheckpointManager<R>,
    pub(super) compensation: CompensationExecutor<R>,
    pub(super) executor: Option<BoxStepExecutor>,
    pub(super) handlers: DashMap<String, Arc<dyn SagaStepDyn>>,
    /// Executions driven by this instance, keyed by execution ID.
    pub(super) running: DashMap<Uuid, RunningExecution>,
    sweeper: std::sync::Mutex<Option<Sweeper>>,
}

/// Durable execution engine.
///
/// Cheap to clone; clones share the running table, handlers and event bus.
pub struct Engine<R: ExecutionRepository> {
    pub(super) inner: Arc<EngineInner<R>>,
}

impl<R: ExecutionRepository> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ExecutionRepository> std::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.inner.running.len())
            .field("handlers", &self.inner.handlers.len())
            .field("has_step_executor", &self.inner.executor.is_some())
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<R: ExecutionRepository> {
    repo: R,
    config: EngineConfig,
    executor: Option<BoxStepExecutor>,
    handlers: Vec<(String, Arc<dyn SagaStepDyn>)>,
}

impl<R: ExecutionRepository + 'static> EngineBuilder<R> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Executor for linear workflow steps and their compensations.
    pub fn step_executor<E: StepExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(BoxStepExecutor::new(executor));
        self
    }

    /// Register a saga handler for `node_type`.
    pub fn handler<H: SagaStep + 'static>(mut self, node_type: impl Into<String>, handler: H) -> Self {
        self.handlers.push((node_type.into(), Arc::new(handler)));
        self
    }

    pub fn build(self) -> Engine<R> {
        let repo = Arc::new(self.repo);
        let events = EventBus::new(self.config.event_capacity);
        let handlers = DashMap::new();
        for (node_type, handler) in self.handlers {
            handlers.insert(node_type, handler);
        }

        Engine {
            inner: Arc::new(EngineInner {
                checkpoints: CheckpointManager::new(Arc::clone(&repo), events.clone()),
                compensation: CompensationExecutor::new(Arc::clone(&repo), events.clone()),
                repo,
                events,
                config: self.config,
                executor: self.executor,
                handlers,
                running: DashMap::new(),
                sweeper: std::sync::Mutex::new(None),
            }),
        }
    }
}

impl<R: ExecutionRepository + 'static> Engine<R> {
    pub fn builder(repo: R) -> EngineBuilder<R> {
        EngineBuilder {
            repo,
            config: EngineConfig::default(),
            executor: None,
            handlers: Vec::new(),
        }
    }

    /// Engine with default configuration, no step executor and no handlers.
    pub fn new(repo: R) -> Self {
        Self::builder(repo).build()
    }

    // -----------------------------------------------------------------------
    // Registry and accessors
    // -----------------------------------------------------------------------

    /// Register (or replace) the saga handler for `node_type`.
    pub fn register_handler<H: SagaStep + 'static>(&self, node_type: impl Into<String>, handler: H) {
        let node_type = node_type.into();
        tracing::debug!(node_type = %node_type, "registered saga handler");
        self.inner.handlers.insert(node_type, Arc::new(handler));
    }

    pub fn has_handler(&self, node_type: &str) -> bool {
        self.inner.handlers.contains_key(node_type)
    }

    /// Receiver for every engine event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &R {
        &self.inner.repo
    }

    /// Whether this engine is currently driving `execution_id`.
    pub fn is_running(&self, execution_id: &Uuid) -> bool {
        self.inner.running.contains_key(execution_id)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Run a linear workflow. Each step receives the previous step's output;
    /// the first step receives `input`.
    pub async fn execute(
        &self,
        workflow_id: &str,
        steps: Vec<WorkflowStep>,
        input: Value,
        metadata: HashMap<String, Value>,
    ) -> Result<ExecutionState, EngineError> {
        validate_workflow_steps(&steps)?;
        if self.inner.executor.is_none() {
            return Err(EngineError::NoStepExecutor);
        }
        let state = ExecutionState::new(workflow_id, ExecutionPlan::Workflow { steps }, input, metadata);
        self.submit(state).await
    }

    /// Run a saga. Every step receives `input` and a [`SagaContext`] with the
    /// results of earlier steps.
    pub async fn execute_saga(
        &self,
        definition: SagaDefinition,
        input: Value,
        metadata: HashMap<String, Value>,
    ) -> Result<ExecutionState, EngineError> {
        validate_saga(&definition)?;
        let saga_id = definition.id.clone();
        let state = ExecutionState::new(saga_id, ExecutionPlan::Saga { definition }, input, metadata);
        self.submit(state).await
    }

    async fn submit(&self, state: ExecutionState) -> Result<ExecutionState, EngineError> {
        let execution_id = state.execution_id;
        let (workflow_id, steps, saga) = (state.workflow_id.clone(), state.steps.len(), state.plan.is_saga());

        // Tracked before the first save so a concurrent sweep skips it.
        let exec = self.track(state);
        let saved = {
            let state = exec.state.lock().await;
            self.inner.repo.save_state(&state).await
        };
        if let Err(e) = saved {
            self.inner.running.remove(&execution_id);
            return Err(e.into());
        }
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %workflow_id,
            steps,
            saga,
            "execution submitted"
        );

        let result = self.drive(&exec, 0).await;
        self.inner.running.remove(&execution_id);
        result
    }

    pub(super) fn track(&self, state: ExecutionState) -> RunningExecution {
        let id = state.execution_id;
        let exec = RunningExecution::new(state);
        self.inner.running.insert(id, exec.clone());
        exec
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Run steps `from..` to a terminal state.
    pub(super) async fn drive(
        &self,
        exec: &RunningExecution,
        from: usize,
    ) -> Result<ExecutionState, EngineError> {
        let (plan, execution_id) = {
            let mut state = exec.state.lock().await;
            if state.status == ExecutionStatus::Pending {
                state.status = ExecutionStatus::Running;
            }
            self.inner.repo.save_state(&state).await?;
            (state.plan.clone(), state.execution_id)
        };

        match self.run_steps(exec, &plan, from).await? {
            LoopOutcome::Completed => self.complete(exec, &plan).await,
            LoopOutcome::Cancelled => {
                tracing::info!(execution_id = %execution_id, "execution stopped after cancellation");
                Err(EngineError::Cancelled(execution_id))
            }
            LoopOutcome::Failed {
                step_id,
                attempts,
                error,
            } => {
                self.fail(exec, &plan, &step_id, &error).await?;
                Err(EngineError::StepFailed {
                    step_id,
                    attempts,
                    source: error,
                })
            }
        }
    }

    async fn run_steps(
        &self,
        exec: &RunningExecution,
        plan: &ExecutionPlan,
        from: usize,
    ) -> Result<LoopOutcome, EngineError> {
        for index in from..plan.len() {
            if exec.cancel.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }

            let (execution_id, step_id, input) = {
                let mut state = exec.state.lock().await;
                if state.status == ExecutionStatus::Cancelled {
                    return Ok(LoopOutcome::Cancelled);
                }
                let input = step_input(&state, index);
                state.current_step = index;
                let step = &mut state.steps[index];
                step.status = StepStatus::Running;
                step.input = Some(input.clone());
                step.output = None;
                step.error = None;
                step.started_at = Some(Utc::now());
                step.completed_at = None;
                let step_id = step.id.clone();
                self.inner.repo.save_state(&state).await?;
                (state.execution_id, step_id, input)
            };
            tracing::debug!(execution_id = %execution_id, step_id = %step_id, index, "step started");

            let policy = self.retry_policy(plan, index);
            let started = Instant::now();
            let mut retries = 0u32;
            let result = loop {
                let error = match self.invoke_step(exec, plan, index, input.clone()).await {
                    Ok(output) => break Ok(output),
                    Err(error) => error,
                };
                if exec.cancel.is_cancelled() || !retry::should_retry(&policy, retries, &error) {
                    break Err(error);
                }

                let delay = retry::calculate_delay(&policy, retries);
                retries += 1;
                {
                    let mut state = exec.state.lock().await;
                    state.retry_count = state.retry_count.saturating_add(1);
                    let step = &mut state.steps[index];
                    step.retry_count = retries;
                    step.error = Some(error.to_string());
                    self.inner.repo.save_state(&state).await?;
                }

                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    execution_id = %execution_id,
                    step_id = %step_id,
                    attempt = retries,
                    delay_ms,
                    error = %error,
                    "step failed, retrying"
                );
                self.inner.events.publish(EngineEvent::StepRetry {
                    execution_id,
                    step_id: step_id.clone(),
                    attempt: retries,
                    delay_ms,
                    error: error.to_string(),
                });

                let cancelled = tokio::select! {
                    () = tokio::time::sleep(delay) => false,
                    () = exec.cancel.cancelled() => true,
                };
                if cancelled {
                    break Err(error);
                }
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(output) => {
                    let compensation = self.saga_compensation(plan, index);
                    let mut state = exec.state.lock().await;
                    let step = &mut state.steps[index];
                    step.status = StepStatus::Completed;
                    step.output = Some(output);
                    step.error = None;
                    step.completed_at = Some(Utc::now());
                    step.duration_ms = Some(duration_ms);
                    if step.compensation.is_none() {
                        step.compensation = compensation;
                    }
                    self.inner.checkpoints.checkpoint_step(&mut state, index).await?;
                    tracing::debug!(
                        execution_id = %execution_id,
                        step_id = %step_id,
                        duration_ms,
                        "step completed"
                    );
                }
                Err(error) => {
                    {
                        let mut state = exec.state.lock().await;
                        let step = &mut state.steps[index];
                        step.status = StepStatus::Failed;
                        step.error = Some(error.to_string());
                        step.completed_at = Some(Utc::now());
                        step.duration_ms = Some(duration_ms);
                        self.inner.repo.save_state(&state).await?;
                    }
                    if exec.cancel.is_cancelled() {
                        return Ok(LoopOutcome::Cancelled);
                    }
                    return Ok(LoopOutcome::Failed {
                        step_id,
                        attempts: retries.saturating_add(1),
                        error,
                    });
                }
            }
        }

        if exec.cancel.is_cancelled() {
            return Ok(LoopOutcome::Cancelled);
        }
        Ok(LoopOutcome::Completed)
    }

    async fn invoke_step(
        &self,
        exec: &RunningExecution,
        plan: &ExecutionPlan,
        index: usize,
        input: Value,
    ) -> Result<Value, StepError> {
        match plan {
            ExecutionPlan::Workflow { steps } => {
                let step = &steps[index];
                match &self.inner.executor {
                    Some(executor) => executor.execute(&step.node_type, &step.node_id, input).await,
                    None => Err(StepError::UnknownHandler(step.node_type.clone())),
                }
            }
            ExecutionPlan::Saga { definition } => {
                let step = &definition.steps[index];
                let handler = self
                    .handler(&step.node_type)
                    .ok_or_else(|| StepError::UnknownHandler(step.node_type.clone()))?;
                let ctx = self.saga_context(exec, definition, index).await;
                let timeout_ms = self.step_timeout_ms(definition, index);
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    handler.execute_boxed(&ctx, step, input),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Timeout(timeout_ms)),
                }
            }
        }
    }

    async fn complete(
        &self,
        exec: &RunningExecution,
        plan: &ExecutionPlan,
    ) -> Result<ExecutionState, EngineError> {
        let mut state = exec.state.lock().await;
        if exec.cancel.is_cancelled() || state.status == ExecutionStatus::Cancelled {
            return Err(EngineError::Cancelled(state.execution_id));
        }

        state.status = ExecutionStatus::Completed;
        state.output = state.steps.last().and_then(|s| s.output.clone());
        state.completed_at = Some(Utc::now());
        state.error = None;
        self.inner.repo.save_state(&state).await?;

        let output = state.output.clone().unwrap_or(Value::Null);
        let duration_ms = elapsed_ms(&state);
        tracing::info!(
            execution_id = %state.execution_id,
            workflow_id = %state.workflow_id,
            duration_ms,
            "execution completed"
        );

        let event = match plan {
            ExecutionPlan::Workflow { .. } => EngineEvent::ExecutionCompleted {
                execution_id: state.execution_id,
                workflow_id: state.workflow_id.clone(),
                output,
                duration_ms,
            },
            ExecutionPlan::Saga { definition } => EngineEvent::SagaCompleted {
                execution_id: state.execution_id,
                saga_id: definition.id.clone(),
                output,
                duration_ms,
            },
        };
        self.inner.events.publish(event);
        Ok(state.clone())
    }

    async fn fail(
        &self,
        exec: &RunningExecution,
        plan: &ExecutionPlan,
        step_id: &str,
        error: &StepError,
    ) -> Result<CompensationReport, EngineError> {
        let (execution_id, workflow_id) = {
            let mut state = exec.state.lock().await;
            state.error = Some(error.to_string());
            if !plan.is_saga() {
                state.status = ExecutionStatus::Failed;
                self.inner.repo.save_state(&state).await?;
            }
            (state.execution_id, state.workflow_id.clone())
        };
        tracing::warn!(
            execution_id = %execution_id,
            step_id,
            error = %error,
            "execution failed, compensating"
        );

        if !plan.is_saga() {
            self.inner.events.publish(EngineEvent::ExecutionFailed {
                execution_id,
                workflow_id,
                step_id: step_id.to_string(),
                error: error.to_string(),
            });
        }

        self.close_failed(exec, plan).await
    }

    /// Compensate a failed execution and persist `compensated`.
    pub(super) async fn close_failed(
        &self,
        exec: &RunningExecution,
        plan: &ExecutionPlan,
    ) -> Result<CompensationReport, EngineError> {
        {
            let mut state = exec.state.lock().await;
            state.status = ExecutionStatus::Compensating;
            self.inner.repo.save_state(&state).await?;
        }

        let strategy = plan.compensation_strategy();
        let report = match plan {
            ExecutionPlan::Workflow { .. } => {
                let invoker = WorkflowCompensator {
                    executor: self.inner.executor.as_ref(),
                };
                self.inner
                    .compensation
                    .compensate(&exec.state, strategy, &invoker)
                    .await?
            }
            ExecutionPlan::Saga { definition } => {
                let invoker = SagaCompensator {
                    engine: self,
                    exec,
                    definition,
                };
                self.inner
                    .compensation
                    .compensate(&exec.state, strategy, &invoker)
                    .await?
            }
        };

        let mut state = exec.state.lock().await;
        state.status = ExecutionStatus::Compensated;
        state.completed_at = Some(Utc::now());
        self.inner.repo.save_state(&state).await?;
        tracing::info!(
            execution_id = %state.execution_id,
            compensated = report.compensated.len(),
            failed = report.failed.len(),
            "execution compensated"
        );

        if let ExecutionPlan::Saga { definition } = plan {
            self.inner.events.publish(EngineEvent::SagaCompensated {
                execution_id: state.execution_id,
                saga_id: definition.id.clone(),
                error: state.error.clone().unwrap_or_default(),
                compensated_steps: report.compensated_count(),
            });
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Cooperatively cancel an execution.
    ///
    /// Returns `false` if the execution already reached a terminal state or is
    /// compensating. An execution that is not running in this engine but is
    /// non-terminal in the store is marked cancelled there, so recovery never
    /// picks it up.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<bool, EngineError> {
        let running = self
            .inner
            .running
            .get(&execution_id)
            .map(|entry| entry.value().clone());

        let cancelled = match running {
            Some(exec) => {
                let mut state = exec.state.lock().await;
                if !is_cancellable(&state) {
                    false
                } else {
                    exec.cancel.cancel();
                    mark_cancelled(&mut state);
                    self.inner.repo.save_state(&state).await?;
                    true
                }
            }
            None => {
                let mut state = self
                    .inner
                    .repo
                    .load_state(&execution_id)
                    .await?
                    .ok_or(EngineError::ExecutionNotFound(execution_id))?;
                if !is_cancellable(&state) {
                    false
                } else {
                    mark_cancelled(&mut state);
                    self.inner.repo.save_state(&state).await?;
                    true
                }
            }
        };

        if cancelled {
            tracing::info!(execution_id = %execution_id, "execution cancelled");
            self.inner
                .events
                .publish(EngineEvent::ExecutionCancelled { execution_id });
        }
        Ok(cancelled)
    }

    pub async fn get_execution_state(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ExecutionState>, EngineError> {
        Ok(self.inner.repo.load_state(execution_id).await?)
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionState>, EngineError> {
        Ok(self.inner.repo.list_executions().await?)
    }

    /// Delete a stored execution and its checkpoints. Refused while this
    /// engine is driving it.
    pub async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, EngineError> {
        if self.is_running(execution_id) {
            return Err(EngineError::ExecutionActive(*execution_id));
        }
        let deleted = self.inner.repo.delete_execution(execution_id).await?;
        if deleted {
            tracing::info!(execution_id = %execution_id, "execution deleted");
        }
        Ok(deleted)
    }

    /// Run one recovery sweep now, then sweep every
    /// `recovery_interval_secs` until [`Engine::stop`].
    pub async fn start(&self) -> Result<super::RecoveryReport, EngineError> {
        let report = self.recover().await?;

        let mut slot = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let token = CancellationToken::new();
            let period = Duration::from_secs(self.inner.config.recovery_interval_secs.max(1));
            let engine = self.clone();
            let child = token.clone();
            let handle = tokio::spawn(async move { engine.sweep_loop(period, child).await });
            *slot = Some(Sweeper { token, handle });
            tracing::info!(interval_secs = period.as_secs(), "recovery sweeper armed");
        }
        Ok(report)
    }

    /// Disarm the periodic sweep and flush in-flight state to the store.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.token.cancel();
            if let Err(e) = sweeper.handle.await {
                tracing::warn!(error = %e, "recovery sweeper ended abnormally");
            }
        }

        let live: Vec<RunningExecution> = self
            .inner
            .running
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for exec in &live {
            let state = exec.state.lock().await;
            self.inner.repo.save_state(&state).await?;
        }
        tracing::info!(flushed = live.len(), "engine stopped");
        Ok(())
    }

    async fn sweep_loop(self, period: Duration, token: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.recover().await {
                        tracing::error!(error = %e, "recovery sweep failed");
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    pub(super) fn handler(&self, node_type: &str) -> Option<Arc<dyn SagaStepDyn>> {
        self.inner
            .handlers
            .get(node_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(super) async fn saga_context(
        &self,
        exec: &RunningExecution,
        definition: &SagaDefinition,
        index: usize,
    ) -> SagaContext {
        let sink = StateCheckpointSink::new(self.inner.checkpoints.clone(), Arc::clone(&exec.state));
        let state = exec.state.lock().await;
        SagaContext::new(
            state.execution_id,
            definition.id.clone(),
            definition.steps[index].id.clone(),
            index,
            state.input.clone(),
            state.step_results(),
            state.metadata.clone(),
            Arc::new(sink),
        )
    }

    fn step_timeout_ms(&self, definition: &SagaDefinition, index: usize) -> u64 {
        definition.steps[index]
            .timeout_ms
            .or(definition.timeout_ms)
            .unwrap_or(self.inner.config.default_step_timeout_ms)
    }

    fn retry_policy(&self, plan: &ExecutionPlan, index: usize) -> RetryPolicy {
        match plan {
            ExecutionPlan::Workflow { .. } => self.inner.config.default_retry.clone(),
            ExecutionPlan::Saga { definition } => definition.steps[index]
                .retry
                .as_ref()
                .or(definition.retry.as_ref())
                .unwrap_or(&self.inner.config.default_retry)
                .clone(),
        }
    }

    /// Compensation attached to a completed saga step whose handler declares one.
    fn saga_compensation(&self, plan: &ExecutionPlan, index: usize) -> Option<CompensationAction> {
        let ExecutionPlan::Saga { definition } = plan else {
            return None;
        };
        let step = &definition.steps[index];
        self.handler(&step.node_type)
            .filter(|h| h.has_compensation())
            .map(|_| CompensationAction::new(&step.node_type, step.params.clone()))
    }
}

fn step_input(state: &ExecutionState, index: usize) -> Value {
    match &state.plan {
        ExecutionPlan::Workflow { .. } if index > 0 => state.steps[index - 1]
            .output
            .clone()
            .unwrap_or(Value::Null),
        _ => state.input.clone(),
    }
}

fn is_cancellable(state: &ExecutionState) -> bool {
    matches!(state.status, ExecutionStatus::Pending | ExecutionStatus::Running)
}

fn mark_cancelled(state: &mut ExecutionState) {
    state.status = ExecutionStatus::Cancelled;
    state.completed_at = Some(Utc::now());
    state.error = Some("cancelled".to_string());
}

fn elapsed_ms(state: &ExecutionState) -> u64 {
    let end = state.completed_at.unwrap_or_else(Utc::now);
    u64::try_from((end - state.started_at).num_milliseconds()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Compensation invokers
// ---------------------------------------------------------------------------

struct WorkflowCompensator<'a> {
    executor: Option<&'a BoxStepExecutor>,
}

impl CompensationInvoker for WorkflowCompensator<'_> {
    async fn invoke(
        &self,
        _step_index: usize,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> Result<Option<Value>, StepError> {
        match self.executor {
            Some(executor) => executor.compensate(step, action).await.map(Some),
            None => Err(StepError::UnknownHandler(action.action_type.clone())),
        }
    }
}

struct SagaCompensator<'a, R: ExecutionRepository> {
    engine: &'a Engine<R>,
    exec: &'a RunningExecution,
    definition: &'a SagaDefinition,
}

impl<R: ExecutionRepository + 'static> CompensationInvoker for SagaCompensator<'_, R> {
    async fn invoke(
        &self,
        step_index: usize,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> Result<Option<Value>, StepError> {
        let handler = self
            .engine
            .handler(&action.action_type)
            .ok_or_else(|| StepError::UnknownHandler(action.action_type.clone()))?;
        let ctx = self
            .engine
            .saga_context(self.exec, self.definition, step_index)
            .await;
        let timeout_ms = self.engine.step_timeout_ms(self.definition, step_index);
        let definition_step = &self.definition.steps[step_index];
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            handler.compensate_boxed(&ctx, definition_step, step.output.clone()),
        )
        .await
        {
            Ok(result) => result.map(|()| None),
            Err(_) => Err(StepError::Timeout(timeout_ms)),
        }
    }
}
