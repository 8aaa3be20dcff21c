//! Runtime configuration types
//!
//! These types control where extensions are discovered and cached, and the
//! timeouts applied to activation and the cross-process readiness handshake.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Build/runtime mode; `all` permissions only work in development
    #[serde(default)]
    pub mode: RuntimeMode,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub activation: ActivationConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub loading: LoadingConfig,
}

/// Runtime mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown runtime mode: {other}")),
        }
    }
}

/// Filesystem locations
///
/// Unset directories are derived from the data directory, which itself
/// defaults to the Annex home directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Extraction cache root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Per-extension confined storage root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// User-installed packages directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_dir: Option<PathBuf>,

    /// Development source directories (highest discovery priority)
    #[serde(default)]
    pub dev_dirs: Vec<PathBuf>,
}

impl PathsConfig {
    pub fn data_dir(&self, home: &Path) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| home.to_path_buf())
    }

    pub fn cache_dir(&self, home: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir(home).join("cache").join("extensions"))
    }

    pub fn storage_dir(&self, home: &Path) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir(home).join("storage"))
    }

    pub fn extensions_dir(&self, home: &Path) -> PathBuf {
        self.extensions_dir
            .clone()
            .unwrap_or_else(|| self.data_dir(home).join("extensions"))
    }
}

/// Activation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActivationConfig {
    /// Upper bound for a single activation hook
    #[serde(default = "default_activation_timeout")]
    pub timeout_secs: u64,

    /// Activate independent extensions of the same dependency level concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_activation_timeout(),
            parallel: true,
        }
    }
}

impl ActivationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Presentation-side readiness wait
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadinessConfig {
    /// How long the presentation side waits for the host's ready signal
    #[serde(default = "default_readiness_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Package loading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadingConfig {
    /// Packages extracted concurrently
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

fn default_activation_timeout() -> u64 {
    30
}

fn default_readiness_timeout() -> u64 {
    10
}

fn default_max_parallel() -> usize {
    4
}

fn default_true() -> bool {
    true
}
