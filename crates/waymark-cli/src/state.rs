//! Application state wiring the engine to the SQLite store.

use std::path::PathBuf;

use anyhow::Context;
use waymark_core::engine::Engine;
use waymark_infra::config::{load_config, resolve_database_url};
use waymark_infra::sqlite::{DatabasePool, SqliteExecutionRepository};
use waymark_types::config::WaymarkConfig;

/// Engine pinned to the SQLite repository.
pub type ConcreteEngine = Engine<SqliteExecutionRepository>;

/// Shared state for CLI commands.
///
/// The engine has no step executor or saga handlers registered: the CLI
/// inspects and administers stored executions, it never runs steps.
pub struct AppState {
    pub engine: ConcreteEngine,
    pub config: WaymarkConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load `config.toml`, open the database and build the engine.
    pub async fn init(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        let mut db_url = resolve_database_url(&config, &data_dir);
        if config.database_url.is_none() {
            db_url.push_str("?mode=rwc");
        }
        let pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("failed to open database {db_url}"))?;
        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        let engine = Engine::builder(SqliteExecutionRepository::new(pool))
            .config(config.engine.clone())
            .build();

        Ok(Self {
            engine,
            config,
            data_dir,
        })
    }
}
