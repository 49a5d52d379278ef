//! Configuration loader for Waymark.
//!
//! Reads `config.toml` from the data directory (`~/.waymark/` in production)
//! and deserializes it into [`WaymarkConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;

use waymark_types::config::WaymarkConfig;

use crate::filesystem::{config_path, database_path};

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`WaymarkConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> WaymarkConfig {
    let config_path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return WaymarkConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return WaymarkConfig::default();
        }
    };

    match toml::from_str::<WaymarkConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            WaymarkConfig::default()
        }
    }
}

/// Database URL for `config`, defaulting to `{data_dir}/waymark.db`.
pub fn resolve_database_url(config: &WaymarkConfig, data_dir: &Path) -> String {
    match &config.database_url {
        Some(url) => url.clone(),
        None => format!("sqlite://{}", database_path(data_dir).display()),
    }
}
