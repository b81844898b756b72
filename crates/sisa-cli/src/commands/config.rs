use std::path::{Path, PathBuf};

use serde::Serialize;
use sisa_core::util::normalize_text_option;
use sisa_core::ClientConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::print_json;
use crate::config_file::{effective_config, load_from_path, resolve_db_path, save_to_path};
use crate::error::CliError;

/// Effective configuration as shown to the user; the token is never printed.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ConfigView {
    pub config_path: PathBuf,
    pub api_url: Option<String>,
    pub api_token_set: bool,
    pub db_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl ConfigView {
    pub fn new(config: &ClientConfig, config_path: &Path) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
            api_url: config.api_url.clone(),
            api_token_set: config.api_token.is_some(),
            db_path: resolve_db_path(config),
            request_timeout_secs: config.request_timeout().as_secs(),
        }
    }
}

pub fn run_config(
    command: ConfigCommands,
    config_path: &Path,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => {
            let config = effective_config(config_path, cli_db_path, |name| std::env::var(name).ok())
                .map_err(CliError::Config)?;
            let view = ConfigView::new(&config, config_path);
            if json {
                return print_json(&view);
            }
            println!("config file:     {}", view.config_path.display());
            println!(
                "api url:         {}",
                view.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "api token:       {}",
                if view.api_token_set { "set" } else { "(not set)" }
            );
            println!("database:        {}", view.db_path.display());
            println!("request timeout: {}s", view.request_timeout_secs);
            Ok(())
        }
        ConfigCommands::Set {
            api_url,
            api_token,
            store_path,
            request_timeout_secs,
        } => {
            let updated = apply_config_update(
                load_from_path(config_path).map_err(CliError::Config)?,
                api_url,
                api_token,
                store_path,
                request_timeout_secs,
            );
            save_to_path(&updated, config_path).map_err(CliError::Config)?;
            println!("Saved configuration to {}", config_path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

/// Overlay explicitly passed values; an empty string clears the field.
pub fn apply_config_update(
    mut config: ClientConfig,
    api_url: Option<String>,
    api_token: Option<String>,
    store_path: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
) -> ClientConfig {
    if let Some(url) = api_url {
        config.api_url = normalize_text_option(Some(url));
    }
    if let Some(token) = api_token {
        config.api_token = normalize_text_option(Some(token));
    }
    if let Some(path) = store_path {
        config.db_path = Some(path);
    }
    if let Some(secs) = request_timeout_secs {
        config.request_timeout_secs = Some(secs);
    }
    config.normalized()
}
