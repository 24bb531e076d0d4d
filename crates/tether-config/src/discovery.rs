//! Config file discovery.
//!
//! Resolution order (first match wins):
//! 1. Explicit path (CLI `--config` or `TETHER_CONFIG`)
//! 2. `./tether.toml` (project-local)
//! 3. `~/.config/tether/config.toml` (XDG user config)
//!
//! Environment overrides (`TETHER_API_KEY`, `TETHER_BACKEND_URL`) are applied
//! on top of whichever file was loaded.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, TetherConfig};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "tether.toml";

/// Default config filename within XDG config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "tether";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "TETHER_CONFIG_DIR";

/// Environment variable overriding the static API key.
pub const API_KEY_ENV: &str = "TETHER_API_KEY";

/// Environment variable overriding the backend URL.
pub const BACKEND_URL_ENV: &str = "TETHER_BACKEND_URL";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: TetherConfig,
    /// File the configuration came from, if any.
    pub source: Option<PathBuf>,
}

/// Discover and load the configuration.
///
/// An explicit path must exist; discovered paths are skipped when absent.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(explicit, None, None)
}

/// Load configuration with explicit control over the search directories.
pub fn load_config_with_options(
    explicit: Option<&Path>,
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let (mut config, source) = match explicit {
        Some(path) => (load_config_file(path)?, Some(path.to_path_buf())),
        None => {
            let project_path = project_dir
                .map(|d| d.join(PROJECT_CONFIG_FILE))
                .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
            let user_path = match config_dir {
                Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
                None => xdg_config_path(),
            };

            match std::iter::once(Some(project_path))
                .chain(std::iter::once(user_path))
                .flatten()
                .find(|p| p.is_file())
            {
                Some(path) => (load_config_file(&path)?, Some(path)),
                None => (TetherConfig::new(), None),
            }
        }
    };

    apply_env_overrides(&mut config);
    Ok(LoadedConfig { config, source })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<TetherConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    TetherConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &TetherConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the XDG config file path for tether.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the XDG config directory for tether.
///
/// Checks `TETHER_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default directory for the primary cache and mirror files.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".tether"))
}

fn apply_env_overrides(config: &mut TetherConfig) {
    if let Ok(key) = std::env::var(API_KEY_ENV)
        && !key.is_empty()
    {
        config.backend.api_key = Some(key);
    }
    if let Ok(url) = std::env::var(BACKEND_URL_ENV)
        && !url.is_empty()
    {
        config.backend.url = url;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
