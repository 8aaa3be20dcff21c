//! Extension registry
//!
//! Per-id state machine: `Unregistered -> Registered -> Active -> Registered
//! -> Unregistered`. Transitions for one id are serialised with a per-id
//! async lock. Hooks run as independent tasks with a timeout, so a hook
//! that fails, panics or hangs affects only its own extension.
//!
//! While a hook runs the entry carries a transition marker. Cross-id checks
//! (dependencies settled before activating, no live dependents before
//! deactivating) and the marker are taken under one write guard, so an
//! extension is never active on top of an inactive dependency.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::{ContextError, ContextFactory, RuntimeContext};
use crate::definition::{ExtensionDefinition, LoadedExtension};
use crate::dependency::DependencyResolver;
use crate::diagnose::{self, Diagnosis, ExtensionReport};
use crate::events::RegistryEvent;

const EVENT_CAPACITY: usize = 256;

/// Default upper bound for a single lifecycle hook
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry transition failures
///
/// Every failure is contained to the extension it names.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("extension '{id}' is already registered")]
    AlreadyRegistered { id: String },

    #[error("extension '{id}' depends on '{dependency}', which is not registered")]
    MissingDependency { id: String, dependency: String },

    #[error("circular dependency during activation: {}", .path.join(" -> "))]
    CircularDependencyDuringActivation { path: Vec<String> },

    #[error("extension '{id}' is required by {}", .dependents.join(", "))]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("extension '{id}' is not registered")]
    NotFound { id: String },

    #[error("extension '{id}' cannot activate: dependency '{dependency}' failed to activate")]
    DependencyFailed { id: String, dependency: String },

    #[error("extension '{id}' cannot activate: dependency '{dependency}' is not active")]
    DependencyInactive { id: String, dependency: String },

    #[error("activation of '{id}' failed: {message}")]
    ActivationFailed { id: String, message: String },

    #[error("activation of '{id}' timed out after {timeout:?}")]
    ActivationTimeout { id: String, timeout: Duration },

    #[error("deactivation of '{id}' failed: {message}")]
    DeactivationFailed { id: String, message: String },

    #[error("failed to build runtime context for '{id}': {source}")]
    Context {
        id: String,
        #[source]
        source: ContextError,
    },
}

/// Snapshot of a registry entry
#[derive(Debug, Clone)]
pub struct RegisteredExtension {
    pub extension: LoadedExtension,
    pub loaded_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Outcome of [`ExtensionRegistry::activate_all`]
#[derive(Debug, Default)]
pub struct ActivationReport {
    pub activated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Hook in flight for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Activating,
    Deactivating,
}

struct Entry {
    extension: LoadedExtension,
    context: Arc<RuntimeContext>,
    loaded_at: DateTime<Utc>,
    is_active: bool,
    transition: Option<Transition>,
    seq: u64,
}

impl Entry {
    /// Active and not on its way out
    fn is_settled_active(&self) -> bool {
        self.is_active && self.transition != Some(Transition::Deactivating)
    }

    /// Active, or about to be
    fn holds_dependencies(&self) -> bool {
        self.is_active || self.transition == Some(Transition::Activating)
    }

    fn snapshot(&self) -> RegisteredExtension {
        RegisteredExtension {
            extension: self.extension.clone(),
            loaded_at: self.loaded_at,
            is_active: self.is_active,
        }
    }
}

enum HookOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Extension registry
pub struct ExtensionRegistry {
    factory: Arc<ContextFactory>,
    entries: RwLock<HashMap<String, Entry>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<RegistryEvent>,
    hook_timeout: Duration,
    next_seq: AtomicU64,
}

impl ExtensionRegistry {
    pub fn new(factory: Arc<ContextFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            events,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn factory(&self) -> &Arc<ContextFactory> {
        &self.factory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Register an extension and build its runtime context
    ///
    /// Every declared dependency must already be registered.
    pub async fn register(&self, extension: LoadedExtension) -> Result<(), RegistryError> {
        let id = extension.id().to_string();
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            warn!(extension = %id, "Extension already registered, ignoring");
            return Err(RegistryError::AlreadyRegistered { id });
        }
        if let Some(dependency) = extension
            .manifest
            .dependencies
            .iter()
            .find(|d| !entries.contains_key(*d))
        {
            warn!(extension = %id, dependency = %dependency, "Cannot register: dependency missing");
            return Err(RegistryError::MissingDependency {
                id,
                dependency: dependency.clone(),
            });
        }

        let context = self
            .factory
            .create(&extension.manifest)
            .map_err(|source| RegistryError::Context {
                id: id.clone(),
                source,
            })?;

        if let Err(e) = extension.definition.register_ipc_handlers(context.ipc()) {
            warn!(extension = %id, "IPC handler registration failed: {}", e);
        }

        let version = extension.manifest.version.clone();
        let entry = Entry {
            extension,
            context,
            loaded_at: Utc::now(),
            is_active: false,
            transition: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        entries.insert(id.clone(), entry);
        drop(entries);

        info!(extension = %id, version = %version, "Registered extension");
        self.emit(RegistryEvent::Registered {
            extension_id: id,
            version,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Activate an extension and, first, its dependencies
    ///
    /// Already-active extensions are a no-op. A failing hook leaves the
    /// extension registered and is reported as an error.
    pub async fn activate(&self, id: &str) -> Result<(), RegistryError> {
        let mut visited = Vec::new();
        self.activate_with(id, &mut visited).await
    }

    /// Activate with a caller-supplied stack of ids being activated
    pub fn activate_with<'a>(
        &'a self,
        id: &'a str,
        visited: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            if visited.iter().any(|v| v == id) {
                let mut path = visited.clone();
                path.push(id.to_string());
                error!(extension = %id, "Circular dependency during activation: {}", path.join(" -> "));
                return Err(RegistryError::CircularDependencyDuringActivation { path });
            }

            let dependencies = {
                let entries = self.entries.read().await;
                let entry = entries
                    .get(id)
                    .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
                if entry.is_active {
                    return Ok(());
                }
                entry.extension.manifest.dependencies.clone()
            };

            visited.push(id.to_string());
            for dependency in &dependencies {
                if let Err(e) = self.activate_with(dependency, &mut *visited).await {
                    visited.pop();
                    return Err(match e {
                        RegistryError::NotFound { .. } => RegistryError::MissingDependency {
                            id: id.to_string(),
                            dependency: dependency.clone(),
                        },
                        RegistryError::CircularDependencyDuringActivation { .. } => e,
                        _ => RegistryError::DependencyFailed {
                            id: id.to_string(),
                            dependency: dependency.clone(),
                        },
                    });
                }
            }
            visited.pop();

            let lock = self.lock_for(id);
            let _guard = lock.lock().await;

            let (definition, context) = {
                let mut entries = self.entries.write().await;
                let entry = entries
                    .get(id)
                    .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
                if entry.is_active {
                    return Ok(());
                }
                let unsettled = entry
                    .extension
                    .manifest
                    .dependencies
                    .iter()
                    .find(|d| !entries.get(d.as_str()).is_some_and(Entry::is_settled_active))
                    .cloned();
                if let Some(dependency) = unsettled {
                    warn!(extension = %id, dependency = %dependency, "Dependency went inactive before activation");
                    return Err(RegistryError::DependencyInactive {
                        id: id.to_string(),
                        dependency,
                    });
                }
                let entry = entries
                    .get_mut(id)
                    .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
                entry.transition = Some(Transition::Activating);
                (
                    Arc::clone(&entry.extension.definition),
                    Arc::clone(&entry.context),
                )
            };

            let started = Instant::now();
            let outcome = self
                .run_hook(id, async move { definition.activate(context).await })
                .await;

            {
                let mut entries = self.entries.write().await;
                if let Some(entry) = entries.get_mut(id) {
                    entry.transition = None;
                    entry.is_active = matches!(outcome, HookOutcome::Completed);
                }
            }

            match outcome {
                HookOutcome::Completed => {
                    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    info!(extension = %id, duration_ms, "Activated extension");
                    self.emit(RegistryEvent::Activated {
                        extension_id: id.to_string(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    self.emit_active_set().await;
                    Ok(())
                }
                HookOutcome::Failed(message) => {
                    error!(extension = %id, "Activation failed: {}", message);
                    self.emit(RegistryEvent::ActivationFailed {
                        extension_id: id.to_string(),
                        error_message: message.clone(),
                        timestamp: Utc::now(),
                    });
                    Err(RegistryError::ActivationFailed {
                        id: id.to_string(),
                        message,
                    })
                }
                HookOutcome::TimedOut => {
                    error!(extension = %id, timeout = ?self.hook_timeout, "Activation timed out");
                    self.emit(RegistryEvent::ActivationFailed {
                        extension_id: id.to_string(),
                        error_message: format!("timed out after {:?}", self.hook_timeout),
                        timestamp: Utc::now(),
                    });
                    Err(RegistryError::ActivationTimeout {
                        id: id.to_string(),
                        timeout: self.hook_timeout,
                    })
                }
            }
        })
    }

    /// Deactivate an extension
    ///
    /// Refused while another active extension depends on it.
    pub async fn deactivate(&self, id: &str) -> Result<(), RegistryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.deactivate_locked(id).await
    }

    async fn deactivate_locked(&self, id: &str) -> Result<(), RegistryError> {
        let definition = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get(id)
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            if !entry.is_active {
                return Ok(());
            }
            let dependents = dependents_in(&entries, id, true);
            if !dependents.is_empty() {
                warn!(
                    extension = %id,
                    dependents = %dependents.join(", "),
                    "Refusing to deactivate: active dependents"
                );
                return Err(RegistryError::HasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
            let definition = Arc::clone(&entry.extension.definition);
            if let Some(entry) = entries.get_mut(id) {
                entry.transition = Some(Transition::Deactivating);
            }
            definition
        };

        let hook = Arc::clone(&definition);
        let failure = match self.run_hook(id, async move { hook.deactivate().await }).await {
            HookOutcome::Completed => None,
            HookOutcome::Failed(message) => Some(message),
            HookOutcome::TimedOut => Some(format!("timed out after {:?}", self.hook_timeout)),
        };
        if let Some(message) = failure {
            error!(extension = %id, "Deactivation failed: {}", message);
            if let Some(entry) = self.entries.write().await.get_mut(id) {
                entry.transition = None;
            }
            return Err(RegistryError::DeactivationFailed {
                id: id.to_string(),
                message,
            });
        }

        match self
            .run_hook(id, async move { definition.clear_session().await })
            .await
        {
            HookOutcome::Completed => {}
            HookOutcome::Failed(message) => {
                warn!(extension = %id, "Clearing session failed: {}", message);
            }
            HookOutcome::TimedOut => {
                warn!(extension = %id, "Clearing session timed out");
            }
        }

        if let Some(entry) = self.entries.write().await.get_mut(id) {
            entry.is_active = false;
            entry.transition = None;
        }
        info!(extension = %id, "Deactivated extension");
        self.emit(RegistryEvent::Deactivated {
            extension_id: id.to_string(),
            timestamp: Utc::now(),
        });
        self.emit_active_set().await;
        Ok(())
    }

    /// Remove an extension, deactivating it first when active
    ///
    /// Refused while any registered extension depends on it.
    pub async fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let was_active = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(id)
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            let dependents = dependents_in(&entries, id, false);
            if !dependents.is_empty() {
                warn!(
                    extension = %id,
                    dependents = %dependents.join(", "),
                    "Refusing to unregister: registered dependents"
                );
                return Err(RegistryError::HasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
            entry.is_active
        };

        if was_active {
            self.deactivate_locked(id).await?;
        }

        let removed = {
            let mut entries = self.entries.write().await;
            let dependents = dependents_in(&entries, id, false);
            if !dependents.is_empty() {
                warn!(
                    extension = %id,
                    dependents = %dependents.join(", "),
                    "Refusing to unregister: dependents registered meanwhile"
                );
                return Err(RegistryError::HasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
            entries.remove(id)
        };
        if let Some(entry) = removed {
            self.factory.dispose(&entry.context);
        }
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        info!(extension = %id, "Unregistered extension");
        self.emit(RegistryEvent::Unregistered {
            extension_id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Activate every registered extension, dependency level by level
    ///
    /// Extensions within a level run concurrently when `parallel` is set.
    /// An extension whose dependency failed is skipped and reported.
    pub async fn activate_all(&self, parallel: bool) -> ActivationReport {
        let manifests: Vec<_> = self
            .ordered_entries()
            .await
            .into_iter()
            .map(|e| e.extension.manifest)
            .collect();

        let mut report = ActivationReport::default();
        let levels = match DependencyResolver::new(&manifests).levels() {
            Ok(levels) => levels,
            Err(e) => {
                error!("Cannot order activation: {}", e);
                for id in e.involved() {
                    report.failed.push((id, e.to_string()));
                }
                return report;
            }
        };

        let mut failed: Vec<String> = Vec::new();
        for level in levels {
            let mut runnable = Vec::with_capacity(level.len());
            for id in level {
                let blocked = manifests
                    .iter()
                    .find(|m| m.id == id)
                    .and_then(|m| m.dependencies.iter().find(|d| failed.contains(d)).cloned());
                match blocked {
                    Some(dependency) => {
                        warn!(extension = %id, dependency = %dependency, "Skipping activation: dependency failed");
                        let message = RegistryError::DependencyFailed {
                            id: id.clone(),
                            dependency,
                        }
                        .to_string();
                        failed.push(id.clone());
                        report.failed.push((id, message));
                    }
                    None => runnable.push(id),
                }
            }

            let results = if parallel {
                join_all(runnable.iter().map(|id| self.activate(id))).await
            } else {
                let mut results = Vec::with_capacity(runnable.len());
                for id in &runnable {
                    results.push(self.activate(id).await);
                }
                results
            };

            for (id, result) in runnable.into_iter().zip(results) {
                match result {
                    Ok(()) => report.activated.push(id),
                    Err(e) => {
                        failed.push(id.clone());
                        report.failed.push((id, e.to_string()));
                    }
                }
            }
        }

        debug!(
            activated = report.activated.len(),
            failed = report.failed.len(),
            "Activation pass finished"
        );
        report
    }

    /// Unregister everything, dependents first
    pub async fn clear(&self) {
        let mut ids: Vec<_> = self
            .ordered_entries()
            .await
            .into_iter()
            .map(|e| e.extension.manifest.id)
            .collect();
        ids.reverse();
        for id in ids {
            if let Err(e) = self.unregister(&id).await {
                warn!(extension = %id, "Failed to unregister during clear: {}", e);
            }
        }
    }

    async fn run_hook<F>(&self, id: &str, hook: F) -> HookOutcome
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(hook);
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.hook_timeout, handle).await {
            Ok(Ok(Ok(()))) => HookOutcome::Completed,
            Ok(Ok(Err(e))) => HookOutcome::Failed(format!("{e:#}")),
            Ok(Err(join)) => {
                debug!(extension = %id, "Hook task ended abnormally");
                HookOutcome::Failed(if join.is_panic() {
                    "hook panicked".to_string()
                } else {
                    join.to_string()
                })
            }
            Err(_) => {
                abort.abort();
                HookOutcome::TimedOut
            }
        }
    }

    async fn emit_active_set(&self) {
        let active = self.active_ids().await;
        self.emit(RegistryEvent::ActiveSetChanged { active });
    }

    async fn ordered_entries(&self) -> Vec<RegisteredExtension> {
        let entries = self.entries.read().await;
        let mut ordered: Vec<_> = entries.values().collect();
        ordered.sort_by_key(|e| e.seq);
        ordered.into_iter().map(Entry::snapshot).collect()
    }

    /// Registered extensions in registration order
    pub async fn list(&self) -> Vec<RegisteredExtension> {
        self.ordered_entries().await
    }

    pub async fn get(&self, id: &str) -> Option<RegisteredExtension> {
        self.entries.read().await.get(id).map(Entry::snapshot)
    }

    pub async fn context(&self, id: &str) -> Option<Arc<RuntimeContext>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.context))
    }

    pub async fn definition(&self, id: &str) -> Option<Arc<dyn ExtensionDefinition>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.extension.definition))
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.is_active)
            .unwrap_or(false)
    }

    /// Active ids in registration order
    pub async fn active_ids(&self) -> Vec<String> {
        self.ordered_entries()
            .await
            .into_iter()
            .filter(|e| e.is_active)
            .map(|e| e.extension.manifest.id)
            .collect()
    }

    pub async fn registered_ids(&self) -> Vec<String> {
        self.ordered_entries()
            .await
            .into_iter()
            .map(|e| e.extension.manifest.id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Registered extensions declaring `id` as a dependency
    pub async fn dependents_of(&self, id: &str, active_only: bool) -> Vec<String> {
        dependents_in(&*self.entries.read().await, id, active_only)
    }

    /// Store slices contributed by active extensions
    pub async fn store_slices(&self) -> BTreeMap<String, serde_json::Value> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.is_active)
            .filter_map(|(id, e)| {
                e.extension
                    .definition
                    .store_slice()
                    .map(|slice| (id.clone(), slice))
            })
            .collect()
    }

    /// Diagnose one registered extension
    pub async fn diagnose(&self, id: &str) -> Result<ExtensionReport, RegistryError> {
        let (snapshot, registered) = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(id)
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            let registered: Vec<String> = entries.keys().cloned().collect();
            (entry.snapshot(), registered)
        };

        let checks = diagnose::structural_checks(&snapshot.extension, |dep| {
            registered.iter().any(|r| r == dep)
        });

        let definition = Arc::clone(&snapshot.extension.definition);
        let self_check = match tokio::time::timeout(
            self.hook_timeout,
            tokio::spawn(async move { definition.self_check().await }),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Some(Diagnosis::unhealthy("self-check panicked")),
            Err(_) => Some(Diagnosis::unhealthy("self-check timed out")),
        };

        Ok(ExtensionReport {
            id: id.to_string(),
            version: Some(snapshot.extension.manifest.version.clone()),
            tier: Some(snapshot.extension.tier),
            active: snapshot.is_active,
            diagnosis: diagnose::combine(checks, self_check, snapshot.is_active),
        })
    }

    /// Diagnose every registered extension in registration order
    pub async fn diagnose_all(&self) -> Vec<ExtensionReport> {
        let mut reports = Vec::new();
        for id in self.registered_ids().await {
            match self.diagnose(&id).await {
                Ok(report) => reports.push(report),
                Err(e) => debug!(extension = %id, "Skipping diagnosis: {}", e),
            }
        }
        reports
    }
}

fn dependents_in(entries: &HashMap<String, Entry>, id: &str, active_only: bool) -> Vec<String> {
    let mut dependents: Vec<_> = entries
        .values()
        .filter(|e| e.extension.manifest.id != id)
        .filter(|e| !active_only || e.holds_dependencies())
        .filter(|e| e.extension.manifest.depends_on(id))
        .map(|e| (e.seq, e.extension.manifest.id.clone()))
        .collect();
    dependents.sort();
    dependents.into_iter().map(|(_, id)| id).collect()
}
