//! Path resolution for drydock
//!
//! # Environment Variables
//!
//! - `DRYDOCK_CONFIG_DIR` - Override config directory
//! - `DRYDOCK_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `DRYDOCK_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/drydock` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\drydock`
//!    - macOS/Linux: `~/.config/drydock`
//!
//! For state_dir():
//! 1. `DRYDOCK_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/drydock` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\drydock`
//!    - macOS/Linux: `~/.local/state/drydock`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "DRYDOCK_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "DRYDOCK_STATE_DIR";

const APP_DIR: &str = "drydock";

/// Get the drydock config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the drydock state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default location of the config file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("drydock.toml"))
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written; `~` is still expanded then.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| shellexpand::tilde(path));
    PathBuf::from(expanded.as_ref())
}
