//! Configuration file resolution and CLI overrides.

use std::path::{Path, PathBuf};

use face_auth::EngineConfig;

use crate::types::{McpError, McpResult};

pub const ENV_CONFIG_PATH: &str = "FACE_AUTH_CONFIG";
pub const ENV_AUTH_TOKEN: &str = "FACE_AUTH_TOKEN";

/// Resolve the configuration file path.
///
/// An explicit path wins, then `FACE_AUTH_CONFIG`, then `./face-auth.toml`,
/// then `~/.face-auth/config.toml`. Only the explicit and environment paths are
/// returned when the file does not exist; a missing file there is an error at load.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_config = PathBuf::from("face-auth.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    let home_config = default_home_config();
    home_config.exists().then_some(home_config)
}

fn default_home_config() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".face-auth").join("config.toml")
}

/// Load the engine configuration, then apply command-line directory overrides.
pub fn load_engine_config(
    config_path: Option<&Path>,
    model_dir: Option<&str>,
    data_dir: Option<&str>,
) -> McpResult<EngineConfig> {
    let mut config = EngineConfig::load(config_path)
        .map_err(|e| McpError::InvalidParams(format!("Invalid configuration: {e}")))?;
    if let Some(dir) = model_dir {
        config.model_dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = data_dir {
        config.data_dir = PathBuf::from(dir);
    }
    Ok(config)
}
