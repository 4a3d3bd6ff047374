//! Config file loader and serialization.

use crate::config::BootstrapConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "SPARK_BOOTSTRAP_CONFIG";

/// Configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bootstrap.toml";

/// Load config from a TOML file.
pub fn load_config_from_file(path: &Path) -> Result<BootstrapConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::Io(e)
        }
    })?;

    parse_config(&content)
}

/// Parse config from TOML text. Missing sections fall back to defaults.
pub fn parse_config(content: &str) -> Result<BootstrapConfig, ConfigError> {
    let config: BootstrapConfig = toml::from_str(content)?;
    Ok(config)
}

/// Save config to a TOML file.
pub fn save_config_to_file(config: &BootstrapConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationFailed(format!("Cannot serialize config: {}", e)))?;
    fs::write(path, content)?;

    Ok(())
}

/// Pick the configuration source.
///
/// `$SPARK_BOOTSTRAP_CONFIG` wins and must exist; otherwise `bootstrap.toml`
/// in `base_dir` is used when present. `None` means built-in defaults.
pub fn discover_config_path(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(explicit);
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(format!(
                "{} points to {}, which does not exist",
                CONFIG_ENV,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let local = base_dir.join(DEFAULT_CONFIG_FILE);
    Ok(local.is_file().then_some(local))
}

/// Discover, load and validate the configuration in one go.
pub fn load_effective_config(base_dir: &Path) -> Result<BootstrapConfig, ConfigError> {
    let config = match discover_config_path(base_dir)? {
        Some(path) => {
            log::info!("Using configuration from {}", path.display());
            load_config_from_file(&path)?
        }
        None => {
            log::debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
            BootstrapConfig::default()
        }
    };

    super::validator::validate_config(&config)?;
    Ok(config)
}
