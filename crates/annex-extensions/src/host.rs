//! Host-side orchestration of the extension runtime
//!
//! Startup runs discovery, extracts the selected packages, loads entry
//! points, orders the batch by dependencies, registers and activates it,
//! then signals readiness to the presentation side. A failure in one
//! extension is recorded and the rest continue; only a dependency cycle in
//! the batch aborts registration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use annex_core::{Manifest, ProvenanceTier, RuntimeConfig};
use tracing::{debug, error, info, warn};

use crate::cache;
use crate::context::{ContextFactory, Services};
use crate::definition::{EntryLoader, LoadedExtension};
use crate::dependency::{DependencyResolver, ResolveError};
use crate::diagnose::{self, ExtensionReport};
use crate::discovery::{Candidate, CandidateSource, Discovery, DiscoveryPaths};
use crate::handshake::{
    PresentationBundleLoader, PresentationEntry, PresentationLoader, ReadinessSignal,
    ReadinessWaiter,
};
use crate::install::{InstallOutcome, PackageInstaller};
use crate::installed::InstalledRecord;
use crate::manifest::EntryPath;
use crate::package::{PackageLoader, PackageSource};
use crate::registry::{ExtensionRegistry, RegistryError};

/// Something that could not be brought up during startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    /// Extension id when known, otherwise the offending path
    pub subject: String,
    pub message: String,
}

/// What [`ExtensionHost::start`] did
#[derive(Debug, Default)]
pub struct StartupReport {
    pub registered: Vec<String>,
    pub activated: Vec<String>,
    /// Discovered but disabled in the installed record
    pub disabled: Vec<String>,
    pub failures: Vec<StartupFailure>,
}

impl StartupReport {
    fn fail(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let subject = subject.into();
        let message = message.into();
        warn!(subject = %subject, "Extension failed to start: {}", message);
        self.failures.push(StartupFailure { subject, message });
    }
}

/// Result of installing a package into a running host
#[derive(Debug)]
pub struct RuntimeInstall {
    pub outcome: InstallOutcome,
    /// False when an older copy is still registered; the new one loads on restart
    pub activated: bool,
}

/// A loaded-but-not-yet-registered extension plus where it came from
struct Prepared {
    manifest: Manifest,
    install_path: PathBuf,
    tier: ProvenanceTier,
}

/// Owns the registry and drives the startup sequence
pub struct ExtensionHost {
    config: RuntimeConfig,
    home: PathBuf,
    discovery: Discovery,
    loader: PackageLoader,
    entry_loader: Arc<dyn EntryLoader>,
    registry: Arc<ExtensionRegistry>,
    readiness: ReadinessSignal,
    failures: Mutex<BTreeMap<String, String>>,
}

impl ExtensionHost {
    pub fn new(
        config: RuntimeConfig,
        home: impl Into<PathBuf>,
        services: Services,
        entry_loader: Arc<dyn EntryLoader>,
    ) -> Self {
        let home = home.into();
        let discovery = Discovery::new(DiscoveryPaths::from_config(&config, &home));
        let loader = PackageLoader::new(config.paths.cache_dir(&home));
        let factory = Arc::new(ContextFactory::new(
            config.paths.storage_dir(&home),
            config.mode,
            services,
        ));
        let registry =
            Arc::new(ExtensionRegistry::new(factory).with_hook_timeout(config.activation.timeout()));

        Self {
            config,
            home,
            discovery,
            loader,
            entry_loader,
            registry,
            readiness: ReadinessSignal::new(),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replace the discovery paths derived from configuration
    pub fn with_discovery(mut self, paths: DiscoveryPaths) -> Self {
        self.discovery = Discovery::new(paths);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    /// A waiter for the presentation side
    pub fn readiness_waiter(&self) -> ReadinessWaiter {
        self.readiness.waiter()
    }

    /// A presentation loader bounded by the configured readiness timeout
    pub fn presentation_loader(&self, bundles: Arc<dyn PresentationBundleLoader>) -> PresentationLoader {
        PresentationLoader::new(self.readiness.waiter(), self.config.readiness.timeout(), bundles)
    }

    pub fn installer(&self) -> PackageInstaller {
        PackageInstaller::new(
            self.config.paths.extensions_dir(&self.home),
            self.config.paths.data_dir(&self.home),
            self.loader.clone(),
        )
    }

    /// Failures recorded for extensions that never registered
    pub fn startup_failures(&self) -> BTreeMap<String, String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Discover, load, register and activate, then signal readiness
    pub async fn start(&self) -> StartupReport {
        let mut report = StartupReport::default();
        let scan = self.discovery.scan();
        for failure in scan.failures {
            report.fail(failure.source.display().to_string(), failure.error);
        }

        let record = match InstalledRecord::load_from_dir(&self.config.paths.data_dir(&self.home)) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unreadable installed record: {:#}", e);
                None
            }
        };

        let mut candidates = Vec::with_capacity(scan.selected.len());
        for candidate in scan.selected {
            let id = &candidate.manifest.id;
            if record.as_ref().is_some_and(|r| !r.is_enabled(id)) {
                info!(extension = %id, "Extension disabled, skipping");
                report.disabled.push(id.clone());
            } else {
                candidates.push(candidate);
            }
        }

        let prepared = self.prepare(candidates, &mut report).await;
        let loaded = self.load_entries(prepared, &mut report);
        self.register_batch(loaded, &mut report).await;

        let activation = self.registry.activate_all(self.config.activation.parallel).await;
        report.activated = activation.activated;
        for (id, message) in activation.failed {
            report.fail(id, message);
        }

        {
            let registered: HashSet<String> = self.registry.registered_ids().await.into_iter().collect();
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            for failure in &report.failures {
                if !registered.contains(&failure.subject) {
                    failures.insert(failure.subject.clone(), failure.message.clone());
                }
            }
        }

        self.readiness.signal_ready(self.presentation_entries().await);
        info!(
            registered = report.registered.len(),
            activated = report.activated.len(),
            failed = report.failures.len(),
            "Extension host started"
        );
        report
    }

    /// Turn candidates into on-disk extension roots
    async fn prepare(&self, candidates: Vec<Candidate>, report: &mut StartupReport) -> Vec<Prepared> {
        let mut prepared = Vec::with_capacity(candidates.len());
        let mut packages = Vec::new();
        let mut package_ids: HashMap<PathBuf, String> = HashMap::new();

        for candidate in candidates {
            match candidate.source {
                CandidateSource::Directory(dir) => {
                    let missing = cache::missing_files(&dir, &candidate.manifest);
                    if missing.is_empty() {
                        prepared.push(Prepared {
                            manifest: candidate.manifest,
                            install_path: dir,
                            tier: candidate.tier,
                        });
                    } else {
                        report.fail(
                            candidate.manifest.id,
                            format!("missing required files: {}", missing.join(", ")),
                        );
                    }
                }
                CandidateSource::Package(path) => {
                    package_ids.insert(path.clone(), candidate.manifest.id);
                    packages.push(PackageSource {
                        path,
                        tier: candidate.tier,
                    });
                }
            }
        }

        let batch = self
            .loader
            .load_batch(packages, self.config.loading.max_parallel)
            .await;
        for failure in batch.failures {
            let subject = package_ids
                .get(&failure.source)
                .cloned()
                .unwrap_or_else(|| failure.source.display().to_string());
            report.fail(subject, failure.error.to_string());
        }
        prepared.extend(batch.loaded.into_iter().map(|p| Prepared {
            manifest: p.manifest,
            install_path: p.install_path,
            tier: p.tier,
        }));
        prepared
    }

    fn load_entries(&self, prepared: Vec<Prepared>, report: &mut StartupReport) -> Vec<LoadedExtension> {
        prepared
            .into_iter()
            .filter_map(|p| match self.load_entry(p) {
                Ok(loaded) => Some(loaded),
                Err((id, e)) => {
                    report.fail(id, format!("{e:#}"));
                    None
                }
            })
            .collect()
    }

    fn load_entry(&self, prepared: Prepared) -> Result<LoadedExtension, (String, anyhow::Error)> {
        let id = prepared.manifest.id.clone();
        let entry = EntryPath::resolve(&prepared.install_path, &prepared.manifest.main)
            .map_err(|e| (id.clone(), anyhow::Error::new(e)))?;
        let definition = self
            .entry_loader
            .load(&prepared.manifest, &entry)
            .map_err(|e| (id.clone(), e))?;
        debug!(extension = %id, entry = %entry, "Loaded entry point");
        Ok(LoadedExtension::new(
            prepared.manifest,
            definition,
            prepared.tier,
            prepared.install_path,
        ))
    }

    /// Drop extensions with unsatisfiable dependencies, order the rest and register them
    async fn register_batch(&self, mut batch: Vec<LoadedExtension>, report: &mut StartupReport) {
        let already: HashSet<String> = self.registry.registered_ids().await.into_iter().collect();

        loop {
            let available: HashSet<&str> = batch
                .iter()
                .map(|e| e.id())
                .chain(already.iter().map(String::as_str))
                .collect();
            let broken: Vec<(String, String)> = batch
                .iter()
                .filter_map(|e| {
                    e.manifest
                        .dependencies
                        .iter()
                        .find(|d| !available.contains(d.as_str()))
                        .map(|d| (e.id().to_string(), d.clone()))
                })
                .collect();
            if broken.is_empty() {
                break;
            }
            for (id, dependency) in broken {
                let error = ResolveError::MissingDependency {
                    dependency,
                    required_by: id.clone(),
                };
                report.fail(id.clone(), error.to_string());
                batch.retain(|e| e.id() != id);
            }
        }

        let manifests: Vec<Manifest> = batch.iter().map(|e| e.manifest.clone()).collect();
        let order = match DependencyResolver::new(&manifests)
            .with_satisfied(already.iter().cloned())
            .resolve()
        {
            Ok(order) => order,
            Err(e) => {
                error!("Aborting extension load: {}", e);
                for id in batch.iter().map(|e| e.id().to_string()) {
                    report.fail(id, e.to_string());
                }
                return;
            }
        };

        let mut by_id: HashMap<String, LoadedExtension> =
            batch.into_iter().map(|e| (e.id().to_string(), e)).collect();
        for id in order {
            let Some(extension) = by_id.remove(&id) else {
                continue;
            };
            match self.registry.register(extension).await {
                Ok(()) => report.registered.push(id),
                Err(e) => report.fail(id, e.to_string()),
            }
        }
    }

    /// Presentation bundles of active extensions that declare a renderer
    pub async fn presentation_entries(&self) -> Vec<PresentationEntry> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|e| e.is_active)
            .filter_map(|e| {
                let manifest = &e.extension.manifest;
                let renderer = manifest.renderer.as_ref()?;
                Some(PresentationEntry {
                    id: manifest.id.clone(),
                    version: manifest.version.clone(),
                    bundle: e.extension.install_path.join(renderer),
                })
            })
            .collect()
    }

    /// Install a package and bring it up without restarting
    ///
    /// Its dependencies must already be registered. When an older copy is
    /// registered the new one takes effect on the next start.
    pub async fn install_at_runtime(&self, package: &Path) -> Result<RuntimeInstall> {
        let installer = self.installer();
        let package = package.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || installer.install(&package))
            .await
            .context("install task failed")??;

        let id = outcome.manifest.id.clone();
        if self.registry.is_registered(&id).await {
            info!(extension = %id, "Extension already running; new version loads on restart");
            return Ok(RuntimeInstall {
                outcome,
                activated: false,
            });
        }

        let loader = self.loader.clone();
        let installed = outcome.installed_path.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            loader.load(&installed, ProvenanceTier::UserInstalled)
        })
        .await
        .context("extraction task failed")??;

        let loaded = self
            .load_entry(Prepared {
                manifest: extracted.manifest,
                install_path: extracted.install_path,
                tier: extracted.tier,
            })
            .map_err(|(_, e)| e)?;

        self.registry.register(loaded).await?;
        self.registry.activate(&id).await?;
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        info!(extension = %id, "Installed and activated extension at runtime");
        Ok(RuntimeInstall {
            outcome,
            activated: true,
        })
    }

    /// Diagnose one extension, including ones that failed before registering
    pub async fn diagnose(&self, id: &str) -> Result<ExtensionReport, RegistryError> {
        match self.registry.diagnose(id).await {
            Err(RegistryError::NotFound { .. }) => {
                let reason = self
                    .failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(id)
                    .cloned();
                match reason {
                    Some(reason) => Ok(unregistered_report(id, &reason)),
                    None => Err(RegistryError::NotFound { id: id.to_string() }),
                }
            }
            other => other,
        }
    }

    /// Diagnose everything registered, then everything that failed to register
    pub async fn diagnose_all(&self) -> Vec<ExtensionReport> {
        let mut reports = self.registry.diagnose_all().await;
        let seen: HashSet<String> = reports.iter().map(|r| r.id.clone()).collect();
        for (subject, reason) in self.startup_failures() {
            if !seen.contains(&subject) {
                reports.push(unregistered_report(&subject, &reason));
            }
        }
        reports
    }

    /// Unregister everything and withdraw readiness
    pub async fn shutdown(&self) {
        self.readiness.reset();
        self.registry.clear().await;
        info!("Extension host stopped");
    }
}

fn unregistered_report(id: &str, reason: &str) -> ExtensionReport {
    ExtensionReport {
        id: id.to_string(),
        version: None,
        tier: None,
        active: false,
        diagnosis: diagnose::failed_before_registration(reason),
    }
}
