//! Executable extension definitions and the loader that produces them

use annex_core::{Manifest, ProvenanceTier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::context::{ContextError, IpcHandle, RuntimeContext};
use crate::diagnose::Diagnosis;
use crate::manifest::EntryPath;

/// Hooks an extension exports to the host
///
/// Only `activate` is required. The context passed to `activate` is the
/// extension's own and stays valid until the extension is unregistered.
#[async_trait]
pub trait ExtensionDefinition: Send + Sync {
    async fn activate(&self, ctx: Arc<RuntimeContext>) -> anyhow::Result<()>;

    async fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Drop per-session state after deactivation
    async fn clear_session(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Register IPC handlers when the extension is registered
    fn register_ipc_handlers(&self, _ipc: &IpcHandle) -> Result<(), ContextError> {
        Ok(())
    }

    /// Initial state slice contributed to the host's store
    fn store_slice(&self) -> Option<serde_json::Value> {
        None
    }

    async fn self_check(&self) -> Option<Diagnosis> {
        None
    }
}

/// Definition used when no code is available for a manifest
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestOnly;

#[async_trait]
impl ExtensionDefinition for ManifestOnly {
    async fn activate(&self, _ctx: Arc<RuntimeContext>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Turns a validated entry point into a definition
pub trait EntryLoader: Send + Sync {
    fn load(
        &self,
        manifest: &Manifest,
        entry: &EntryPath,
    ) -> anyhow::Result<Arc<dyn ExtensionDefinition>>;
}

type Factory = Arc<dyn Fn(&Manifest) -> Arc<dyn ExtensionDefinition> + Send + Sync>;

/// Loader for definitions compiled into the host, keyed by extension id
///
/// Ids without a registered factory get [`ManifestOnly`].
#[derive(Clone, Default)]
pub struct StaticLoader {
    factories: HashMap<String, Factory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Manifest) -> Arc<dyn ExtensionDefinition> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn with_definition(self, id: impl Into<String>, definition: Arc<dyn ExtensionDefinition>) -> Self {
        self.with_factory(id, move |_| Arc::clone(&definition))
    }

    pub fn knows(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

impl EntryLoader for StaticLoader {
    fn load(
        &self,
        manifest: &Manifest,
        entry: &EntryPath,
    ) -> anyhow::Result<Arc<dyn ExtensionDefinition>> {
        if !entry.path().is_file() {
            anyhow::bail!("entry point {} not found at {:?}", entry, entry.path());
        }
        match self.factories.get(&manifest.id) {
            Some(factory) => Ok(factory(manifest)),
            None => {
                debug!(extension = %manifest.id, "No compiled definition; using manifest only");
                Ok(Arc::new(ManifestOnly))
            }
        }
    }
}

/// Manifest plus executable definition, ready to register
#[derive(Clone)]
pub struct LoadedExtension {
    pub manifest: Manifest,
    pub definition: Arc<dyn ExtensionDefinition>,
    pub tier: ProvenanceTier,
    pub install_path: PathBuf,
}

impl LoadedExtension {
    pub fn new(
        manifest: Manifest,
        definition: Arc<dyn ExtensionDefinition>,
        tier: ProvenanceTier,
        install_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manifest,
            definition,
            tier,
            install_path: install_path.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("tier", &self.tier)
            .field("install_path", &self.install_path)
            .finish()
    }
}
