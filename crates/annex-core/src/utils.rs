//! Shared utility functions for Annex crates

use anyhow::anyhow;
use std::path::PathBuf;

/// Environment variable that relocates the Annex home directory
pub const ANNEX_HOME_ENV: &str = "ANNEX_HOME";

/// Get the user's home directory
///
/// Prefers the HOME environment variable over dirs::home_dir() so that
/// sandboxed launches and tests can redirect it.
pub fn get_home_dir() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Get the Annex home directory (`$ANNEX_HOME` or `~/.annex`)
pub fn annex_home() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var(ANNEX_HOME_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(get_home_dir()?.join(".annex"))
}
