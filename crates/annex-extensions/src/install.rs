//! Installing and removing user-tier packages
//!
//! Packages install to `<user-extensions-dir>/<id>.annex` and are tracked in
//! the installed-extensions record. The manifest is validated before
//! anything is copied.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use annex_core::{Manifest, ProvenanceTier};

use crate::installed::InstalledRecord;
use crate::manifest;
use crate::package::{PackageError, PackageLoader, PACKAGE_EXTENSION};

/// Install and uninstall failures
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("extension '{0}' is not installed")]
    NotFound(String),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("installed record: {0:#}")]
    Record(anyhow::Error),
}

/// Result of a successful install
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub manifest: Manifest,
    pub installed_path: PathBuf,
    /// Version that was replaced, if any
    pub replaced: Option<String>,
}

/// Copies packages into the user tier and maintains the installed record
#[derive(Debug, Clone)]
pub struct PackageInstaller {
    user_dir: PathBuf,
    data_dir: PathBuf,
    loader: PackageLoader,
}

impl PackageInstaller {
    pub fn new(user_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>, loader: PackageLoader) -> Self {
        Self {
            user_dir: user_dir.into(),
            data_dir: data_dir.into(),
            loader,
        }
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Where the package for `id` lives once installed
    pub fn package_path(&self, id: &str) -> PathBuf {
        self.user_dir.join(format!("{id}.{PACKAGE_EXTENSION}"))
    }

    fn record(&self) -> Result<InstalledRecord, InstallError> {
        InstalledRecord::load_from_dir(&self.data_dir).map_err(InstallError::Record)
    }

    /// Install a package file into the user tier
    ///
    /// The package is verified before anything is copied. An existing
    /// install of the same id is replaced; its cache slot is left alone
    /// because the new file's provenance no longer matches it, so the next
    /// load re-extracts while a running copy keeps its files.
    pub fn install(&self, package: &Path) -> Result<InstallOutcome, InstallError> {
        if !package.is_file() {
            return Err(InstallError::InvalidArgument(format!(
                "{} is not a file",
                package.display()
            )));
        }
        let manifest = match PackageLoader::verify(package) {
            Ok(manifest) => manifest,
            Err(PackageError::UnsupportedFormat(path)) => {
                return Err(InstallError::InvalidArgument(format!(
                    "{} is not an extension package (expected .{PACKAGE_EXTENSION}, .tar.gz or .tgz)",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let id = manifest.id.clone();
        let target = self.package_path(&id);
        fs::create_dir_all(&self.user_dir)?;

        let staging = self
            .user_dir
            .join(format!(".{id}.{PACKAGE_EXTENSION}.partial-{}", uuid::Uuid::new_v4()));
        if let Err(e) = fs::copy(package, &staging).and_then(|_| fs::rename(&staging, &target)) {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_file(&staging) {
                    warn!(extension = %id, "Failed to clean up staged package {:?}: {}", staging, cleanup);
                }
            }
            return Err(e.into());
        }
        debug!(extension = %id, "Copied package to {:?}", target);

        let mut record = self.record()?;
        let replaced = record.get(&id).map(|e| e.version.clone());
        let package_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        record.upsert(&id, &manifest.version, ProvenanceTier::UserInstalled, package_name);
        record.save().map_err(InstallError::Record)?;

        info!(extension = %id, version = %manifest.version, "Installed extension");
        Ok(InstallOutcome {
            manifest,
            installed_path: target,
            replaced,
        })
    }

    /// Remove a user-installed extension
    ///
    /// Deletes the package, the cache slot and the record entry.
    pub fn uninstall(&self, id: &str) -> Result<(), InstallError> {
        if !manifest::is_valid_id(id) {
            return Err(InstallError::InvalidArgument(format!(
                "'{id}' is not a valid extension identifier"
            )));
        }

        let mut record = self.record()?;
        let package = self.package_path(id);
        let recorded = record.contains(id);
        if !recorded && !package.exists() {
            return Err(InstallError::NotFound(id.to_string()));
        }

        if package.exists() {
            fs::remove_file(&package)?;
        } else {
            warn!(extension = %id, "Package file already gone: {:?}", package);
        }
        self.loader.invalidate(id)?;

        if recorded {
            record.remove(id);
            record.save().map_err(InstallError::Record)?;
        }

        info!(extension = %id, "Uninstalled extension");
        Ok(())
    }
}
