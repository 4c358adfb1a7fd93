//! Controller configuration loading.
//!
//! The controller reads `config.toml` from its data directory. A missing or
//! broken file never stops startup; defaults are used instead.

use std::path::{Path, PathBuf};

use shipyard_types::config::ControllerConfig;

/// Resolve the data directory.
///
/// `SHIPYARD_DATA_DIR` wins; otherwise `~/.shipyard`, falling back to
/// `.shipyard` in the working directory when there is no home.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SHIPYARD_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".shipyard");
    }

    PathBuf::from(".shipyard")
}

/// Load `config.toml` from the data directory.
pub async fn load_controller_config(data_dir: &Path) -> ControllerConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ControllerConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ControllerConfig::default();
        }
    };

    match toml::from_str::<ControllerConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ControllerConfig::default()
        }
    }
}

/// Directory holding project shipyards: the configured one, or
/// `<data_dir>/shipyards`.
pub fn shipyard_dir(config: &ControllerConfig, data_dir: &Path) -> PathBuf {
    config
        .shipyard_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("shipyards"))
}
