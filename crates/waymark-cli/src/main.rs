//! Waymark CLI entry point.
//!
//! Binary name: `waymark`
//!
//! Parses CLI arguments, opens the execution store, then dispatches to the
//! command handler.

mod cli;
mod state;

use clap::Parser;
use waymark_infra::filesystem::resolve_data_dir;
use waymark_observe::event_log::spawn_event_logger;
use waymark_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli::log_filter(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Validation needs no store
    if let Commands::Validate { file } = &cli.command {
        return cli::definition::validate_definition(file, cli.json);
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let state = AppState::init(data_dir).await?;
    let _events = spawn_event_logger(state.engine.subscribe());

    match cli.command {
        Commands::List { pending, status } => {
            cli::execution::list_executions(&state, pending, status.as_deref(), cli.json).await?;
        }
        Commands::Show { id } => {
            cli::execution::show_execution(&state, &id, cli.json).await?;
        }
        Commands::Checkpoints { id } => {
            cli::execution::list_checkpoints(&state, &id, cli.json).await?;
        }
        Commands::Cancel { id } => {
            cli::execution::cancel_execution(&state, &id, cli.json).await?;
        }
        Commands::Delete { id, force } => {
            cli::execution::delete_execution(&state, &id, force, cli.json).await?;
        }
        Commands::Config => {
            cli::config::show_config(&state, cli.json)?;
        }
        Commands::Validate { .. } => unreachable!("handled above"),
    }

    Ok(())
}
