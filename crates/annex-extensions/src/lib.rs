//! Extension runtime for Annex
//!
//! This crate handles:
//! - Manifest parsing and validation
//! - Per-extension permission checks
//! - Dependency resolution with cycle detection
//! - Package extraction with a provenance-keyed cache
//! - Discovery across development, packaged and user-installed tiers
//! - The registry state machine and lifecycle events
//! - Sandboxed runtime contexts (storage, secure storage, IPC, service proxies, tools)
//! - The host/presentation readiness handshake
//! - Diagnostics and the installed-extensions record

pub mod cache;
pub mod context;
pub mod definition;
pub mod dependency;
pub mod diagnose;
pub mod discovery;
pub mod events;
pub mod handshake;
pub mod host;
pub mod install;
pub mod installed;
pub mod manifest;
pub mod package;
pub mod permission;
pub mod registry;

pub use context::{ContextError, ContextFactory, RuntimeContext, Services};
pub use definition::{EntryLoader, ExtensionDefinition, LoadedExtension, StaticLoader};
pub use dependency::{DependencyResolver, ResolveError};
pub use diagnose::{Check, Diagnosis, HealthStatus};
pub use discovery::{Discovery, DiscoveryPaths};
pub use events::RegistryEvent;
pub use handshake::{PresentationLoader, ReadinessSignal};
pub use host::{ExtensionHost, StartupReport};
pub use install::{InstallError, PackageInstaller};
pub use installed::InstalledRecord;
pub use manifest::{EntryPath, ManifestError, ValidationError};
pub use package::{PackageError, PackageLoader};
pub use permission::{PermissionDenied, PermissionValidator};
pub use registry::{ExtensionRegistry, RegistryError};
