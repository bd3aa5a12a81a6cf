//! Configuration file discovery.
//!
//! # Path Resolution Priority
//!
//! 1. `--config <path>` or the `FORSETI_CONFIG` environment variable
//! 2. `config.toml` in the config directory
//! 3. `config.json` in the config directory (the original document format)
//!
//! The config directory is `XDG_CONFIG_HOME/forseti` if set, otherwise
//! `~/.config/forseti`.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// File names tried in the config directory, in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", "config.json"];

/// Get the forseti config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("forseti");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("forseti"))
}

/// Resolve the configuration file to load.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = expand(&path.to_string_lossy());
        log::debug!("Using config file {}", path.display());
        return Ok(path);
    }
    find_in(&config_dir()?)
}

/// First existing config file in `dir`.
pub fn find_in(dir: &Path) -> Result<PathBuf> {
    for name in CONFIG_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            log::debug!("Using config file {}", candidate.display());
            return Ok(candidate);
        }
    }
    bail!(
        "No configuration found in {} (tried {}). Pass --config or set FORSETI_CONFIG",
        dir.display(),
        CONFIG_FILE_NAMES.join(", ")
    )
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
