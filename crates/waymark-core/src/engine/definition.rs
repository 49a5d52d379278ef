//! Saga definition parsing and validation.
//!
//! Converts YAML or JSON documents into [`SagaDefinition`]s and checks the
//! structural constraints the engine relies on before anything is persisted.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use waymark_types::definition::{SagaDefinition, WorkflowStep};
use waymark_types::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a saga definition from YAML.
pub fn parse_saga_yaml(yaml: &str) -> Result<SagaDefinition, DefinitionError> {
    let def: SagaDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_saga(&def)?;
    Ok(def)
}

/// Parse and validate a saga definition from JSON.
pub fn parse_saga_json(json: &str) -> Result<SagaDefinition, DefinitionError> {
    let def: SagaDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_saga(&def)?;
    Ok(def)
}

pub fn serialize_saga_yaml(def: &SagaDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load a saga definition from disk. `.json` files are read as JSON,
/// everything else as YAML.
pub fn load_saga_file(path: &Path) -> Result<SagaDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_saga_json(&content),
        _ => parse_saga_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a saga definition.
///
/// Checks:
/// - saga ID is non-empty
/// - at least one step exists
/// - step IDs are non-empty and unique
/// - every step names a node type
/// - timeouts are positive where set
/// - retry policies have a positive initial delay
pub fn validate_saga(def: &SagaDefinition) -> Result<(), DefinitionError> {
    if def.id.trim().is_empty() {
        return Err(DefinitionError::Validation("saga id must not be empty".to_string()));
    }
    if def.steps.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "saga '{}' must have at least one step",
            def.id
        )));
    }
    check_timeout(def.timeout_ms, || format!("saga '{}'", def.id))?;
    if let Some(retry) = &def.retry {
        check_retry(retry, || format!("saga '{}'", def.id))?;
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        check_step_ids(&step.id, &step.node_type, &mut seen)?;
        check_timeout(step.timeout_ms, || format!("step '{}'", step.id))?;
        if let Some(retry) = &step.retry {
            check_retry(retry, || format!("step '{}'", step.id))?;
        }
    }
    Ok(())
}

/// Validate the step list of a linear workflow.
pub fn validate_workflow_steps(steps: &[WorkflowStep]) -> Result<(), DefinitionError> {
    if steps.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for step in steps {
        check_step_ids(&step.id, &step.node_type, &mut seen)?;
        if let Some(comp) = &step.compensation {
            if comp.action_type.trim().is_empty() {
                return Err(DefinitionError::Validation(format!(
                    "step '{}' declares a compensation without an action type",
                    step.id
                )));
            }
        }
    }
    Ok(())
}

fn check_step_ids<'a>(
    id: &'a str,
    node_type: &str,
    seen: &mut HashSet<&'a str>,
) -> Result<(), DefinitionError> {
    if id.trim().is_empty() {
        return Err(DefinitionError::Validation("step id must not be empty".to_string()));
    }
    if !seen.insert(id) {
        return Err(DefinitionError::Validation(format!("duplicate step ID: '{id}'")));
    }
    if node_type.trim().is_empty() {
        return Err(DefinitionError::Validation(format!(
            "step '{id}' must name a node type"
        )));
    }
    Ok(())
}

fn check_timeout(timeout_ms: Option<u64>, owner: impl Fn() -> String) -> Result<(), DefinitionError> {
    if timeout_ms == Some(0) {
        return Err(DefinitionError::Validation(format!(
            "{}: timeout must be greater than 0",
            owner()
        )));
    }
    Ok(())
}

fn check_retry(policy: &RetryPolicy, owner: impl Fn() -> String) -> Result<(), DefinitionError> {
    if policy.max_retries > 0 && policy.initial_delay_ms == 0 {
        return Err(DefinitionError::Validation(format!(
            "{}: retry initial delay must be greater than 0",
            owner()
        )));
    }
    Ok(())
}
