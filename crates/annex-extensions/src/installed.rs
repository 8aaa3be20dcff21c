//! Installed-extensions record
//!
//! Tracks extensions installed into the user tier, their versions and
//! whether they are enabled. Located at `<data-dir>/installed.yaml`:
//! ```yaml
//! schema_version: "1.0"
//! last_updated: "2026-01-21T10:00:00Z"
//! extensions:
//!   notes:
//!     version: "1.2.0"
//!     tier: user-installed
//!     enabled: true
//!     installed_at: "2026-01-20T15:30:00Z"
//!     package: notes.annex
//! ```

use anyhow::{Context, Result};
use annex_core::ProvenanceTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the record inside the data directory
pub const INSTALLED_FILE: &str = "installed.yaml";

const SCHEMA_VERSION: &str = "1.0";

/// One installed extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledExtension {
    pub version: String,
    pub tier: ProvenanceTier,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordFile {
    schema_version: String,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    extensions: BTreeMap<String, InstalledExtension>,
}

impl Default for RecordFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            last_updated: Utc::now(),
            extensions: BTreeMap::new(),
        }
    }
}

/// Installed-extensions record backed by a YAML file
#[derive(Debug)]
pub struct InstalledRecord {
    path: PathBuf,
    record: RecordFile,
}

impl InstalledRecord {
    /// Load the record, starting empty when the file does not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let record = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: RecordFile = serde_yaml_ng::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            debug!("Loaded installed record with {} extensions", record.extensions.len());
            record
        } else {
            RecordFile::default()
        };
        Ok(Self { path, record })
    }

    /// Load `<data-dir>/installed.yaml`
    pub fn load_from_dir(data_dir: &Path) -> Result<Self> {
        Self::load(data_dir.join(INSTALLED_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&mut self) -> Result<()> {
        self.record.last_updated = Utc::now();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml_ng::to_string(&self.record)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!("Saved installed record with {} extensions", self.record.extensions.len());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&InstalledExtension> {
        self.record.extensions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record.extensions.contains_key(id)
    }

    /// Unknown ids count as enabled
    pub fn is_enabled(&self, id: &str) -> bool {
        self.get(id).map(|e| e.enabled).unwrap_or(true)
    }

    /// Insert or replace an entry, keeping its enabled flag
    pub fn upsert(&mut self, id: &str, version: &str, tier: ProvenanceTier, package: Option<String>) {
        let enabled = self.is_enabled(id);
        info!(extension = %id, version = %version, "Recording installed extension");
        self.record.extensions.insert(
            id.to_string(),
            InstalledExtension {
                version: version.to_string(),
                tier,
                enabled,
                installed_at: Utc::now(),
                package,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> Option<InstalledExtension> {
        self.record.extensions.remove(id)
    }

    /// Set the enabled flag; returns false for unknown ids
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.record.extensions.get_mut(id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Entries sorted by id
    pub fn list(&self) -> Vec<(&str, &InstalledExtension)> {
        self.record
            .extensions
            .iter()
            .map(|(id, ext)| (id.as_str(), ext))
            .collect()
    }
}
