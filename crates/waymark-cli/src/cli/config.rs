//! Effective configuration display.

use anyhow::Result;
use console::style;

use crate::state::AppState;

pub fn show_config(state: &AppState, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "data_dir": state.data_dir.display().to_string(),
            "config": state.config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let engine = &state.config.engine;
    let retry = &engine.default_retry;
    println!();
    println!("  {}", style("Waymark configuration").bold());
    println!("  Data dir:          {}", state.data_dir.display());
    println!(
        "  Database:          {}",
        state.config.database_url.as_deref().unwrap_or("(default)")
    );
    println!("  Recovery interval: {}s", engine.recovery_interval_secs);
    println!("  Step timeout:      {}ms", engine.default_step_timeout_ms);
    println!("  Event capacity:    {}", engine.event_capacity);
    println!(
        "  Default retry:     {} retries, {:?} backoff from {}ms",
        retry.max_retries, retry.backoff, retry.initial_delay_ms
    );
    println!();
    Ok(())
}
