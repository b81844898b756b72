//! Persistent client configuration for the CLI.

use std::path::{Path, PathBuf};

use sisa_core::ClientConfig;

const CONFIG_DIR_NAME: &str = "sisa";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "sisa.db";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(DB_FILE_NAME)
}

pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(default_config_path)
}

/// Read the stored configuration; a missing file is an empty configuration.
pub fn load_from_path(path: &Path) -> Result<ClientConfig, String> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
    ClientConfig::from_json(&raw)
        .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))
}

pub fn save_to_path(config: &ClientConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                error
            )
        })?;
    }

    let normalized = config.clone().normalized();
    normalized.validate()?;
    let serialized = serde_json::to_string_pretty(&normalized)
        .map_err(|error| format!("Failed to serialize config: {error}"))?;
    std::fs::write(path, serialized)
        .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
}

/// Stored file, then `SISA_*` environment variables, then the `--db-path` flag.
pub fn effective_config(
    config_path: &Path,
    cli_db_path: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, String> {
    let mut config = load_from_path(config_path)?.with_env_overrides(lookup);
    if let Some(path) = cli_db_path {
        config.db_path = Some(path);
    }
    config.validate()?;
    Ok(config)
}

pub fn resolve_db_path(config: &ClientConfig) -> PathBuf {
    config.db_path.clone().unwrap_or_else(default_db_path)
}
