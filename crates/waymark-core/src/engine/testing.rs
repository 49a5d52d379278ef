//! Scripted step executors and saga handlers shared by engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use waymark_types::definition::{
    CompensationSpec, CompensationStrategy, SagaDefinition, SagaStepDefinition, WorkflowStep,
};
use waymark_types::event::EngineEvent;
use waymark_types::execution::{CompensationAction, ExecutionStep};
use waymark_types::retry::{BackoffType, RetryPolicy};

use super::context::SagaContext;
use super::step::{SagaStep, StepError, StepExecutor};

pub(crate) const ALWAYS: u32 = u32::MAX;

/// Linear-workflow executor driven by a per-node failure budget.
#[derive(Clone, Default)]
pub(crate) struct ScriptedExecutor {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    compensations: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, u32>>>,
}

impl ScriptedExecutor {
    /// Fail the next `times` attempts of `node_id` (`ALWAYS` never recovers).
    pub(crate) fn fail(self, node_id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(node_id.to_string(), times);
        self
    }

    /// `(node_id, input)` of every execute call.
    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn called_nodes(&self) -> Vec<String> {
        self.calls().into_iter().map(|(id, _)| id).collect()
    }

    /// Step IDs whose compensation ran, in order.
    pub(crate) fn compensations(&self) -> Vec<String> {
        self.compensations.lock().unwrap().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, _node_type: &str, node_id: &str, input: Value) -> Result<Value, StepError> {
        self.calls
            .lock()
            .unwrap()
            .push((node_id.to_string(), input.clone()));
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(node_id) {
            if *remaining > 0 {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(StepError::failed(format!("{node_id} exploded")));
            }
        }
        Ok(json!({ "node": node_id, "input": input }))
    }

    async fn compensate(
        &self,
        step: &ExecutionStep,
        action: &CompensationAction,
    ) -> Result<Value, StepError> {
        self.compensations.lock().unwrap().push(step.id.clone());
        Ok(json!({ "reverted": step.id, "via": action.action_type }))
    }
}

/// Saga handler that logs `execute:<step>` / `compensate:<step>` entries.
#[derive(Clone)]
pub(crate) struct RecordingHandler {
    pub(crate) log: Arc<Mutex<Vec<String>>>,
    pub(crate) fail_times: Arc<Mutex<u32>>,
    pub(crate) compensates: bool,
    pub(crate) fail_compensation: bool,
    pub(crate) delay: Option<Duration>,
}

impl RecordingHandler {
    pub(crate) fn new(log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log: Arc::clone(log),
            fail_times: Arc::new(Mutex::new(0)),
            compensates: true,
            fail_compensation: false,
            delay: None,
        }
    }

    pub(crate) fn failing(log: &Arc<Mutex<Vec<String>>>, times: u32) -> Self {
        let handler = Self::new(log);
        *handler.fail_times.lock().unwrap() = times;
        handler
    }

    pub(crate) fn without_compensation(mut self) -> Self {
        self.compensates = false;
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl SagaStep for RecordingHandler {
    async fn execute(
        &self,
        ctx: &SagaContext,
        step: &SagaStepDefinition,
        input: Value,
    ) -> Result<Value, StepError> {
        self.log.lock().unwrap().push(format!("execute:{}", step.id));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut remaining = self.fail_times.lock().unwrap();
            if *remaining > 0 {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(StepError::failed(format!("{} rejected", step.id)));
            }
        }
        let prior: Vec<&String> = {
            let mut keys: Vec<&String> = ctx.results().keys().collect();
            keys.sort();
            keys
        };
        Ok(json!({ "step": step.id, "input": input, "saw": prior }))
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        step: &SagaStepDefinition,
        _output: Option<Value>,
    ) -> Result<(), StepError> {
        self.log.lock().unwrap().push(format!("compensate:{}", step.id));
        if self.fail_compensation {
            return Err(StepError::failed(format!("cannot undo {}", step.id)));
        }
        Ok(())
    }

    fn has_compensation(&self) -> bool {
        self.compensates
    }
}

pub(crate) fn workflow_step(id: &str, compensable: bool) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        node_id: id.to_string(),
        node_type: "task".to_string(),
        compensation: compensable.then(|| CompensationSpec {
            action_type: "undo".to_string(),
            params: json!({ "target": id }),
        }),
    }
}

pub(crate) fn saga_step(id: &str, node_type: &str) -> SagaStepDefinition {
    SagaStepDefinition {
        id: id.to_string(),
        name: None,
        node_type: node_type.to_string(),
        params: json!({ "id": id }),
        timeout_ms: None,
        retry: None,
    }
}

pub(crate) fn saga(id: &str, steps: Vec<SagaStepDefinition>, strategy: CompensationStrategy) -> SagaDefinition {
    SagaDefinition {
        id: id.to_string(),
        name: None,
        steps,
        compensation_strategy: strategy,
        timeout_ms: None,
        retry: Some(RetryPolicy::none()),
    }
}

pub(crate) fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff: BackoffType::Fixed,
        initial_delay_ms: 1,
        max_delay_ms: None,
        retryable_errors: Vec::new(),
    }
}

/// Next event named `name`, skipping others.
pub(crate) async fn wait_for(rx: &mut broadcast::Receiver<EngineEvent>, name: &str) -> EngineEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.name() == name => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// Every event currently buffered in `rx`, by name.
pub(crate) fn drain_names(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}
