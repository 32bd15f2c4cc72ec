//! Engine configuration loader for devflow.
//!
//! Reads `devflow.toml` (`~/.devflow/devflow.toml` unless a path is given)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use devflow_types::config::EngineConfig;

/// Directory devflow keeps its files in (`~/.devflow`).
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".devflow"))
}

/// `~/.devflow/devflow.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("devflow.toml"))
}

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded engine config");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}
