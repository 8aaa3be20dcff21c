//! Manifest builders for creating test fixtures

#![allow(dead_code)]

use annex_core::types::DEFAULT_MAIN_ENTRY;
use annex_core::Manifest;

use super::constants::TEST_VERSION;

/// Builder for [`Manifest`] test fixtures
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            manifest: Manifest {
                id: id.to_string(),
                version: TEST_VERSION.to_string(),
                name: format!("Test {id}"),
                description: String::new(),
                author: None,
                dependencies: Vec::new(),
                permissions: Vec::new(),
                main: DEFAULT_MAIN_ENTRY.to_string(),
                renderer: None,
                settings: None,
            },
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.manifest.version = version.to_string();
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.manifest.dependencies = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn permissions(mut self, perms: &[&str]) -> Self {
        self.manifest.permissions = perms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn main(mut self, entry: &str) -> Self {
        self.manifest.main = entry.to_string();
        self
    }

    pub fn renderer(mut self, entry: &str) -> Self {
        self.manifest.renderer = Some(entry.to_string());
        self
    }

    pub fn build(self) -> Manifest {
        self.manifest
    }
}

/// Manifests for a batch given as `(id, dependencies)` pairs
pub fn graph(edges: &[(&str, &[&str])]) -> Vec<Manifest> {
    edges
        .iter()
        .map(|(id, deps)| ManifestBuilder::new(id).depends_on(deps).build())
        .collect()
}
