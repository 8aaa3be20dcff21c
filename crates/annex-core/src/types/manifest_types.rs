//! Extension manifest types matching `manifest.json`

use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the manifest entry inside a package or development directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Default privileged-process entry point
pub const DEFAULT_MAIN_ENTRY: &str = "dist/main";

/// Default presentation-process entry point
pub const DEFAULT_RENDERER_ENTRY: &str = "dist/renderer";

/// Extension manifest
///
/// Immutable description of an extension: identity, version, requested
/// permissions, dependencies and entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique identifier (`^[a-z0-9-]+$`)
    pub id: String,

    /// Semantic version
    pub version: String,

    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Identifiers of extensions that must be registered and active first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Requested permissions (`category:action`, `category:*` or `all`)
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Privileged-process entry point, relative to the package root
    #[serde(default = "default_main_entry")]
    pub main: String,

    /// Presentation-process entry point; when present the bundle is required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,

    /// Settings surface registered with the host UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsSurface>,
}

fn default_main_entry() -> String {
    DEFAULT_MAIN_ENTRY.to_string()
}

impl Manifest {
    /// Entry points that must exist on disk for this manifest
    pub fn entry_points(&self) -> Vec<&str> {
        let mut entries = vec![self.main.as_str()];
        if let Some(renderer) = &self.renderer {
            entries.push(renderer.as_str());
        }
        entries
    }

    /// Whether this extension ships a presentation-process bundle
    pub fn has_presentation(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d == id)
    }
}

/// Settings surface descriptor used for UI registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSurface {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Discovery source of an extension
///
/// Ordered from lowest to highest override priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvenanceTier {
    /// Installed by the end user into the user-data directory
    UserInstalled,
    /// Shipped next to the executable
    Packaged,
    /// Unpacked source directory used during development
    Development,
}

impl ProvenanceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserInstalled => "user-installed",
            Self::Packaged => "packaged",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for ProvenanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
