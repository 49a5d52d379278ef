//! Saga definition validation.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use waymark_core::engine::definition::{DefinitionError, load_saga_file};
use waymark_types::definition::SagaDefinition;

use super::format::{format_duration_ms, strategy_label};

/// Parse and validate a saga definition file, printing a summary.
pub fn validate_definition(file: &Path, json: bool) -> Result<()> {
    let def = load_saga_file(file).map_err(|e| match e {
        DefinitionError::Parse(msg) => anyhow::anyhow!("Failed to parse {}: {msg}", file.display()),
        DefinitionError::Validation(msg) => anyhow::anyhow!("Definition is invalid: {msg}"),
        DefinitionError::Io(err) => anyhow::anyhow!("Failed to read {}: {err}", file.display()),
    })?;

    if json {
        let out = serde_json::json!({
            "valid": true,
            "id": def.id,
            "steps": def.steps.len(),
            "compensation_strategy": strategy_label(def.compensation_strategy),
            "definition": def,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_summary(&def);
    Ok(())
}

fn print_summary(def: &SagaDefinition) {
    println!();
    println!(
        "  {} Saga '{}' is valid",
        style("*").green().bold(),
        style(def.name.as_deref().unwrap_or(&def.id)).cyan()
    );
    println!("  ID: {}", def.id);
    println!("  Compensation: {}", strategy_label(def.compensation_strategy));
    if let Some(timeout) = def.timeout_ms {
        println!("  Step timeout: {}", format_duration_ms(timeout));
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Node type"),
            Cell::new("Timeout"),
            Cell::new("Retries"),
        ]);

    for (index, step) in def.steps.iter().enumerate() {
        let retry = step.retry.as_ref().or(def.retry.as_ref());
        table.add_row(vec![
            Cell::new(index),
            Cell::new(step.display_name()),
            Cell::new(&step.node_type),
            Cell::new(
                step.timeout_ms
                    .or(def.timeout_ms)
                    .map_or_else(|| "default".to_string(), format_duration_ms),
            ),
            Cell::new(retry.map_or_else(|| "default".to_string(), |r| r.max_retries.to_string())),
        ]);
    }

    println!("{table}");
    println!();
}
