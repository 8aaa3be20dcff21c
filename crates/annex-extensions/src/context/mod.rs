//! Per-extension runtime contexts
//!
//! A [`RuntimeContext`] is built once when an extension is registered and
//! lives until it is unregistered. Every capability handle it exposes is
//! bound to the extension's own [`PermissionValidator`]; no two contexts
//! share mutable state except through the host's message bus.

mod ipc;
mod secure;
mod services;
mod storage;
mod tools;

pub use ipc::{IpcHandle, IpcHandler, IpcMessage, MessageBus};
pub use secure::SecureHandle;
pub use services::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, McpProxy, ModelProvider, ModelProxy,
    SearchOptions, SearchResult, ToolDescriptor, ToolInvoker, VectorDocument, VectorProxy,
    VectorStore,
};
pub use storage::StorageHandle;
pub use tools::{ExtensionTool, ToolRegistry};

use annex_core::{Manifest, RuntimeMode};
use annex_secrets::{SecretError, SecretStore, UnavailableStore};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::permission::{PermissionDenied, PermissionValidator};

/// Errors raised by capability handles
///
/// These reach the calling extension as ordinary failures; none of them
/// escape into the host.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),

    #[error("path '{path}' escapes the extension storage root")]
    PathEscapesRoot { path: String },

    #[error("runtime context for '{extension_id}' has been disposed")]
    Disposed { extension_id: String },

    #[error("{service} service is not available")]
    ServiceUnavailable { service: &'static str },

    #[error("no IPC handler registered for '{channel}'")]
    HandlerNotFound { channel: String },

    #[error("'{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("invalid name '{name}'")]
    InvalidName { name: String },

    #[error("service call failed: {0}")]
    Service(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContextError {
    pub(crate) fn service(err: anyhow::Error) -> Self {
        Self::Service(format!("{err:#}"))
    }
}

/// Permission gate shared by all handles of one context
#[derive(Debug)]
pub(crate) struct Gate {
    extension_id: String,
    validator: PermissionValidator,
    disposed: AtomicBool,
}

impl Gate {
    fn new(validator: PermissionValidator) -> Self {
        Self {
            extension_id: validator.extension_id().to_string(),
            validator,
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ContextError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ContextError::Disposed {
                extension_id: self.extension_id.clone(),
            });
        }
        Ok(())
    }

    /// Check liveness and a permission before a capability call
    pub(crate) fn check(&self, permission: &str) -> Result<(), ContextError> {
        self.ensure_live()?;
        self.validator.require_permission(permission).map_err(|denied| {
            warn!(extension = %self.extension_id, permission, "Capability call denied");
            ContextError::from(denied)
        })
    }
}

/// Host services made available to contexts through proxies
#[derive(Clone)]
pub struct Services {
    pub llm: Option<Arc<dyn ModelProvider>>,
    pub vector: Option<Arc<dyn VectorStore>>,
    pub mcp: Option<Arc<dyn ToolInvoker>>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            llm: None,
            vector: None,
            mcp: None,
            secrets: Arc::new(UnavailableStore),
        }
    }
}

impl Services {
    pub fn with_llm(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn with_vector(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector = Some(store);
        self
    }

    pub fn with_mcp(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.mcp = Some(invoker);
        self
    }

    pub fn with_secrets(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = store;
        self
    }
}

/// Isolated capability bundle for one extension
pub struct RuntimeContext {
    gate: Arc<Gate>,
    manifest: Manifest,
    storage: StorageHandle,
    secure: SecureHandle,
    ipc: IpcHandle,
    llm: ModelProxy,
    vector: VectorProxy,
    mcp: McpProxy,
    tools: ToolRegistry,
}

impl RuntimeContext {
    pub fn extension_id(&self) -> &str {
        self.gate.extension_id()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.gate.validator.has_permission(permission)
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn secure(&self) -> &SecureHandle {
        &self.secure
    }

    pub fn ipc(&self) -> &IpcHandle {
        &self.ipc
    }

    pub fn llm(&self) -> &ModelProxy {
        &self.llm
    }

    pub fn vector(&self) -> &VectorProxy {
        &self.vector
    }

    pub fn mcp(&self) -> &McpProxy {
        &self.mcp
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn is_disposed(&self) -> bool {
        self.gate.disposed.load(Ordering::Acquire)
    }

    /// Revoke every handle; later calls fail with [`ContextError::Disposed`]
    pub fn dispose(&self) {
        self.gate.disposed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("extension_id", &self.extension_id())
            .field("storage_root", &self.storage.root())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builds runtime contexts and tracks per-extension tool registries
pub struct ContextFactory {
    storage_root: PathBuf,
    mode: RuntimeMode,
    services: Services,
    bus: Arc<MessageBus>,
    registries: RwLock<HashMap<String, ToolRegistry>>,
}

impl ContextFactory {
    pub fn new(storage_root: impl Into<PathBuf>, mode: RuntimeMode, services: Services) -> Self {
        Self {
            storage_root: storage_root.into(),
            mode,
            services,
            bus: Arc::new(MessageBus::new()),
            registries: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Build the context for one extension
    ///
    /// Creates the extension's storage directory on first use.
    pub fn create(&self, manifest: &Manifest) -> Result<Arc<RuntimeContext>, ContextError> {
        let gate = Arc::new(Gate::new(PermissionValidator::new(manifest, self.mode)));
        let root = self.storage_root.join(&manifest.id);
        std::fs::create_dir_all(&root)?;

        let tools = ToolRegistry::new(Arc::clone(&gate));
        self.registries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manifest.id.clone(), tools.clone());

        debug!(extension = %manifest.id, "Created runtime context");
        Ok(Arc::new(RuntimeContext {
            storage: StorageHandle::new(Arc::clone(&gate), root),
            secure: SecureHandle::new(Arc::clone(&gate), Arc::clone(&self.services.secrets)),
            ipc: IpcHandle::new(Arc::clone(&gate), Arc::clone(&self.bus)),
            llm: ModelProxy::new(Arc::clone(&gate), self.services.llm.clone()),
            vector: VectorProxy::new(Arc::clone(&gate), self.services.vector.clone()),
            mcp: McpProxy::new(Arc::clone(&gate), self.services.mcp.clone()),
            tools,
            manifest: manifest.clone(),
            gate,
        }))
    }

    /// Dispose a context and release everything registered through it
    pub fn dispose(&self, context: &RuntimeContext) {
        let id = context.extension_id();
        context.dispose();
        if let Some(tools) = self
            .registries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            tools.clear();
        }
        self.bus.remove_namespace(id);
        debug!(extension = %id, "Disposed runtime context");
    }

    /// Tools registered by every live extension, with qualified names
    pub fn all_tools(&self) -> Vec<ToolDescriptor> {
        let registries = self.registries.read().unwrap_or_else(PoisonError::into_inner);
        let mut tools: Vec<_> = registries.values().flat_map(ToolRegistry::descriptors).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Call a tool by its qualified `<extension>:<tool>` name
    pub async fn call_tool(
        &self,
        qualified: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ContextError> {
        let owner = qualified.split_once(':').map(|(owner, _)| owner).unwrap_or("");
        let registry = self
            .registries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .cloned()
            .ok_or_else(|| ContextError::InvalidName {
                name: qualified.to_string(),
            })?;
        registry.call(qualified, args).await
    }
}
