//! Command implementations

pub mod diagnose;
pub mod install;
pub mod list;
pub mod uninstall;

use anyhow::{Context, Result};
use annex_core::{annex_home, ConfigLoader, RuntimeConfig};
use annex_extensions::{PackageInstaller, PackageLoader};
use std::path::PathBuf;
use thiserror::Error;

use crate::cli::Cli;

/// Bad command-line input detected after parsing
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Configuration and home directory shared by every command
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub config: RuntimeConfig,
    pub home: PathBuf,
}

impl RuntimeEnv {
    /// Load configuration and apply CLI overrides on top
    pub fn load(cli: &Cli) -> Result<Self> {
        let home = annex_home()?;
        let loader = match &cli.config_dir {
            Some(dir) => ConfigLoader::with_dir(dir.clone()),
            None => ConfigLoader::new()?,
        };
        let mut config = loader
            .load_runtime_config()
            .with_context(|| format!("Failed to load configuration from {}", loader.config_dir()))?;

        if let Some(mode) = cli.mode {
            config.mode = mode;
        }
        for dir in &cli.dev_dirs {
            if !config.paths.dev_dirs.contains(dir) {
                config.paths.dev_dirs.push(dir.clone());
            }
        }

        Ok(Self { config, home })
    }

    pub fn installer(&self) -> PackageInstaller {
        let paths = &self.config.paths;
        PackageInstaller::new(
            paths.extensions_dir(&self.home),
            paths.data_dir(&self.home),
            PackageLoader::new(paths.cache_dir(&self.home)),
        )
    }
}
