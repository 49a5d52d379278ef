//! Execution inspection and administration commands.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;
use waymark_core::repository::ExecutionRepository;
use waymark_types::definition::ExecutionPlan;
use waymark_types::execution::{CheckpointKind, ExecutionState, ExecutionStatus};

use super::format::{
    format_duration_ms, format_time, short_id, status_cell, step_status_cell, step_status_label,
    strategy_label, truncate,
};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// ID resolution
// ---------------------------------------------------------------------------

/// Resolve a full execution ID or a unique prefix of one.
async fn resolve_id(state: &AppState, input: &str) -> Result<Uuid> {
    if let Ok(id) = input.parse::<Uuid>() {
        return Ok(id);
    }
    let ids: Vec<Uuid> = state
        .engine
        .list_executions()
        .await
        .context("Failed to list executions")?
        .into_iter()
        .map(|s| s.execution_id)
        .collect();
    match_prefix(&ids, input)
}

fn match_prefix(ids: &[Uuid], prefix: &str) -> Result<Uuid> {
    let prefix = prefix.trim().to_lowercase();
    if prefix.is_empty() {
        bail!("Execution ID must not be empty");
    }
    let matches: Vec<&Uuid> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(**id),
        [] => bail!("No execution matches '{prefix}'"),
        _ => bail!(
            "'{prefix}' is ambiguous ({} executions match); use more characters",
            matches.len()
        ),
    }
}

async fn load(state: &AppState, input: &str) -> Result<ExecutionState> {
    let id = resolve_id(state, input).await?;
    state
        .engine
        .get_execution_state(&id)
        .await
        .context("Failed to load execution")?
        .ok_or_else(|| anyhow::anyhow!("Execution '{id}' not found"))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_executions(
    state: &AppState,
    pending: bool,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let status_filter = status
        .map(|s| s.parse::<ExecutionStatus>().map_err(anyhow::Error::msg))
        .transpose()?;

    let executions: Vec<ExecutionState> = state
        .engine
        .list_executions()
        .await
        .context("Failed to list executions")?
        .into_iter()
        .filter(|e| !pending || e.status.is_resumable())
        .filter(|e| status_filter.is_none_or(|s| e.status == s))
        .collect();

    if json {
        let out: Vec<_> = executions
            .iter()
            .map(|e| {
                serde_json::json!({
                    "execution_id": e.execution_id.to_string(),
                    "workflow_id": e.workflow_id,
                    "kind": if e.plan.is_saga() { "saga" } else { "workflow" },
                    "status": e.status.as_str(),
                    "current_step": e.current_step,
                    "steps": e.steps.len(),
                    "completed_steps": e.completed_steps(),
                    "retry_count": e.retry_count,
                    "started_at": e.started_at.to_rfc3339(),
                    "completed_at": e.completed_at.map(|t| t.to_rfc3339()),
                    "error": e.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Kind"),
            Cell::new("Status"),
            Cell::new("Progress"),
            Cell::new("Started"),
            Cell::new("Error"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(short_id(&e.execution_id)),
            Cell::new(&e.workflow_id),
            Cell::new(if e.plan.is_saga() { "saga" } else { "workflow" }),
            status_cell(e.status),
            Cell::new(format!("{}/{}", e.completed_steps(), e.steps.len())),
            Cell::new(format_time(Some(&e.started_at))),
            Cell::new(truncate(e.error.as_deref().unwrap_or("-"), 40)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn show_execution(state: &AppState, id: &str, json: bool) -> Result<()> {
    let execution = load(state, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    let kind = match &execution.plan {
        ExecutionPlan::Saga { definition } => format!(
            "saga ({} compensation)",
            strategy_label(definition.compensation_strategy)
        ),
        ExecutionPlan::Workflow { .. } => "workflow".to_string(),
    };

    println!();
    println!(
        "  {} {}",
        style(&execution.workflow_id).cyan().bold(),
        style(format!("[{}]", execution.status)).bold()
    );
    println!("  ID:        {}", execution.execution_id);
    println!("  Kind:      {kind}");
    println!("  Started:   {}", format_time(Some(&execution.started_at)));
    println!("  Finished:  {}", format_time(execution.completed_at.as_ref()));
    println!("  Retries:   {}", execution.retry_count);
    if execution.status.is_resumable() {
        println!("  Resumes at step {}", execution.resume_point());
    }
    if let Some(err) = &execution.error {
        println!("  Error:     {}", style(err).red());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Duration"),
            Cell::new("Compensation"),
        ]);

    for (index, step) in execution.steps.iter().enumerate() {
        let compensation = match &step.compensation {
            None => "-".to_string(),
            Some(c) if !c.executed => format!("{} (armed)", c.action_type),
            Some(c) => match &c.error {
                Some(err) => format!("{} failed: {}", c.action_type, truncate(err, 30)),
                None => format!("{} done", c.action_type),
            },
        };
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&step.id),
            Cell::new(&step.node_type),
            step_status_cell(step.status),
            Cell::new(step.retry_count),
            Cell::new(step.duration_ms.map_or_else(|| "-".to_string(), format_duration_ms)),
            Cell::new(compensation),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

pub async fn list_checkpoints(state: &AppState, id: &str, json: bool) -> Result<()> {
    let execution_id = resolve_id(state, id).await?;
    let checkpoints = state
        .engine
        .repository()
        .load_checkpoints(&execution_id)
        .await
        .context("Failed to load checkpoints")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!();
        println!("  No checkpoints for execution {}.", short_id(&execution_id));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Checkpoint").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Kind"),
            Cell::new("Created"),
            Cell::new("Snapshot"),
        ]);

    for cp in &checkpoints {
        let kind = match cp.kind {
            CheckpointKind::StepCompleted => "step completed",
            CheckpointKind::Intermediate => "intermediate",
        };
        table.add_row(vec![
            Cell::new(short_id(&cp.id)),
            Cell::new(format!("{} ({})", cp.step_id, cp.step_index)),
            Cell::new(kind),
            Cell::new(format_time(Some(&cp.created_at))),
            Cell::new(truncate(&cp.state.to_string(), 60)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel / delete
// ---------------------------------------------------------------------------

pub async fn cancel_execution(state: &AppState, id: &str, json: bool) -> Result<()> {
    let execution_id = resolve_id(state, id).await?;
    let cancelled = state
        .engine
        .cancel_execution(execution_id)
        .await
        .context("Failed to cancel execution")?;

    if json {
        let out = serde_json::json!({
            "execution_id": execution_id.to_string(),
            "cancelled": cancelled,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if cancelled {
        println!();
        println!(
            "  {} Cancelled execution {}",
            style("*").green().bold(),
            style(short_id(&execution_id)).cyan()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} Execution {} is no longer cancellable",
            style("!").yellow().bold(),
            style(short_id(&execution_id)).cyan()
        );
        println!();
    }
    Ok(())
}

pub async fn delete_execution(state: &AppState, id: &str, force: bool, json: bool) -> Result<()> {
    let execution = load(state, id).await?;
    if !execution.is_terminal() && !force {
        bail!(
            "Execution {} is {}; recovery would still resume it. Pass --force to delete anyway.",
            short_id(&execution.execution_id),
            execution.status
        );
    }

    let deleted = state
        .engine
        .delete_execution(&execution.execution_id)
        .await
        .context("Failed to delete execution")?;

    if json {
        let out = serde_json::json!({
            "execution_id": execution.execution_id.to_string(),
            "deleted": deleted,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Deleted execution {} ({}, {} step(s) {})",
            style("*").green().bold(),
            style(short_id(&execution.execution_id)).cyan(),
            execution.workflow_id,
            execution.steps.len(),
            execution
                .steps
                .last()
                .map_or("none", |s| step_status_label(s.status))
        );
        println!();
    }
    Ok(())
}
