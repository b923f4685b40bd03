//! Initialize a configuration file: write the default config as a template to fill in.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

/// Create the config directory and a default `config.json` if it does not exist.
/// Returns true when a file was written. An existing file is left untouched.
pub fn init_config_file(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        log::info!("config already exists at {}", config_path.display());
        return Ok(false);
    }
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let template = serde_json::to_string_pretty(&Config::default())
        .context("serializing default config")?;
    std::fs::write(config_path, template)
        .with_context(|| format!("writing default config to {}", config_path.display()))?;
    log::info!("created default config at {}", config_path.display());
    Ok(true)
}
