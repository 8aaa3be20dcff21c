//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. Runtime config (`<config-dir>/runtime.yaml`)
//! 3. Environment variables (ANNEX_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::{RuntimeConfig, RuntimeMode};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const RUNTIME_CONFIG_FILE: &str = "runtime.yaml";

/// Configuration hierarchy loader
pub struct ConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl ConfigLoader {
    /// Create a loader rooted at the Annex home directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = crate::utils::annex_home()
            .map_err(|e| Error::invalid_config(format!("Could not determine home directory: {e}")))?;
        let config_dir = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| Error::invalid_config(format!("Non UTF-8 config dir: {}", p.display())))?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(config_dir)
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = Self::load_embedded_config::<RuntimeConfig>("runtime-defaults.yaml")?;

        let runtime_config_path = self.config_dir.join(RUNTIME_CONFIG_FILE);
        if runtime_config_path.exists() {
            debug!("Loading runtime config from {}", runtime_config_path);
            let file_config = self.load_yaml_file::<RuntimeConfig>(&runtime_config_path)?;
            config = Self::merge_runtime_config(config, file_config);
        }

        config = self.apply_env_overrides(config)?;

        Ok(config)
    }

    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Merge two runtime configs (base is overridden by overlay)
    fn merge_runtime_config(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
        let mut dev_dirs = base.paths.dev_dirs;
        for dir in overlay.paths.dev_dirs {
            if !dev_dirs.contains(&dir) {
                dev_dirs.push(dir);
            }
        }

        RuntimeConfig {
            mode: overlay.mode,
            paths: crate::types::PathsConfig {
                data_dir: overlay.paths.data_dir.or(base.paths.data_dir),
                cache_dir: overlay.paths.cache_dir.or(base.paths.cache_dir),
                storage_dir: overlay.paths.storage_dir.or(base.paths.storage_dir),
                extensions_dir: overlay.paths.extensions_dir.or(base.paths.extensions_dir),
                dev_dirs,
            },
            activation: overlay.activation,
            readiness: overlay.readiness,
            loading: overlay.loading,
        }
    }

    /// Apply environment variable overrides to runtime config
    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Ok(val) = env::var("ANNEX_MODE") {
            config.mode = val
                .parse::<RuntimeMode>()
                .map_err(|e| Error::invalid_config(format!("ANNEX_MODE: {e}")))?;
        }

        if let Some(val) = env::var_os("ANNEX_DEV_DIRS") {
            config.paths.dev_dirs = env::split_paths(&val)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Ok(val) = env::var("ANNEX_EXTENSIONS_DIR") {
            config.paths.extensions_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("ANNEX_ACTIVATION_TIMEOUT_SECS") {
            config.activation.timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("ANNEX_ACTIVATION_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("ANNEX_READINESS_TIMEOUT_SECS") {
            config.readiness.timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("ANNEX_READINESS_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("ANNEX_MAX_PARALLEL_LOADS") {
            config.loading.max_parallel = val.parse().map_err(|_| {
                Error::invalid_config("ANNEX_MAX_PARALLEL_LOADS must be a valid number")
            })?;
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
