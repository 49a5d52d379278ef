//! Data directory layout.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "WAYMARK_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `WAYMARK_DATA_DIR` environment variable
/// 2. `~/.waymark`
pub fn resolve_data_dir() -> PathBuf {
    data_dir_from(std::env::var(DATA_DIR_ENV).ok())
}

fn data_dir_from(env_override: Option<String>) -> PathBuf {
    if let Some(dir) = env_override.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".waymark");
    }

    // Last resort: current directory
    PathBuf::from(".waymark")
}

/// Path of the SQLite database inside `data_dir`.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("waymark.db")
}

/// Path of `config.toml` inside `data_dir`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}
