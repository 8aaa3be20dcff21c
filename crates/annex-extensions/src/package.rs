//! Package loading and extraction
//!
//! A package is a gzip-compressed tar archive with `manifest.json` at its
//! root. Packages extract into one cache slot per extension id. Extraction
//! writes into a temporary sibling directory, validates it, records
//! provenance and only then renames it into place, so a slot on disk is
//! always either complete or absent.

use annex_core::types::MANIFEST_FILE;
use annex_core::{Manifest, ProvenanceTier};
use flate2::read::GzDecoder;
use fs4::fs_std::FileExt;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{self, ProvenanceRecord, SourceStamp};
use crate::manifest::{self, ManifestError};

/// Preferred package file extension
pub const PACKAGE_EXTENSION: &str = "annex";

/// Errors loading a single package
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("not an extension package: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("package {0} has no manifest.json at its root")]
    MissingManifest(PathBuf),

    #[error("invalid manifest: {0}")]
    Validation(#[from] ManifestError),

    #[error("extension '{id}' is missing required files: {}", .files.join(", "))]
    MissingFiles { id: String, files: Vec<String> },

    #[error("failed to extract {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PackageError {
    fn extraction(path: &Path, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// A package to load together with its discovery tier
#[derive(Debug, Clone)]
pub struct PackageSource {
    pub path: PathBuf,
    pub tier: ProvenanceTier,
}

/// A validated, extracted package
#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    pub manifest: Manifest,
    pub install_path: PathBuf,
    pub source: PathBuf,
    pub tier: ProvenanceTier,
    pub cache_hit: bool,
}

/// A package that failed to load
#[derive(Debug)]
pub struct PackageFailure {
    pub source: PathBuf,
    pub error: PackageError,
}

/// Result of loading a batch; one failure never aborts the others
#[derive(Debug, Default)]
pub struct BatchReport {
    pub loaded: Vec<ExtractedPackage>,
    pub failures: Vec<PackageFailure>,
}

/// Loads packages into the extraction cache
#[derive(Debug, Clone)]
pub struct PackageLoader {
    cache_root: PathBuf,
}

impl PackageLoader {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache slot for an extension id
    pub fn cache_dir_for(&self, id: &str) -> PathBuf {
        self.cache_root.join(id)
    }

    fn lock_path_for(&self, id: &str) -> PathBuf {
        self.cache_root.join(format!(".{id}.lock"))
    }

    /// Check the file name against the accepted package extensions
    pub fn is_package_file(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.ends_with(&format!(".{PACKAGE_EXTENSION}"))
            || name.ends_with(".tar.gz")
            || name.ends_with(".tgz")
    }

    /// Read and validate the manifest without extracting anything
    pub fn read_manifest(package: &Path) -> Result<Manifest, PackageError> {
        if !Self::is_package_file(package) {
            return Err(PackageError::UnsupportedFormat(package.to_path_buf()));
        }

        let file = File::open(package)?;
        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        let entries = archive
            .entries()
            .map_err(|e| PackageError::extraction(package, e.to_string()))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| PackageError::extraction(package, e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| PackageError::extraction(package, e.to_string()))?
                .into_owned();
            if normalized(&path).as_deref() == Some(MANIFEST_FILE) {
                let mut raw = String::new();
                entry
                    .read_to_string(&mut raw)
                    .map_err(|e| PackageError::extraction(package, e.to_string()))?;
                return Ok(manifest::parse(&raw)?);
            }
        }

        Err(PackageError::MissingManifest(package.to_path_buf()))
    }

    /// Check a package without extracting it
    ///
    /// Validates the manifest and confirms the archive ships every required
    /// file as a regular entry. Links are rejected as they are on extraction.
    pub fn verify(package: &Path) -> Result<Manifest, PackageError> {
        let manifest = Self::read_manifest(package)?;

        let file = File::open(package)?;
        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        let entries = archive
            .entries()
            .map_err(|e| PackageError::extraction(package, e.to_string()))?;

        let mut present = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| PackageError::extraction(package, e.to_string()))?;
            match entry.header().entry_type() {
                EntryType::Regular => {}
                EntryType::Symlink | EntryType::Link => {
                    return Err(PackageError::extraction(package, "links are not allowed in packages"));
                }
                _ => continue,
            }
            let path = entry
                .path()
                .map_err(|e| PackageError::extraction(package, e.to_string()))?;
            if let Some(rel) = normalized(&path) {
                present.insert(rel);
            }
        }

        let missing: Vec<String> = cache::required_files(&manifest)
            .into_iter()
            .filter(|f| !present.contains(f))
            .collect();
        if !missing.is_empty() {
            return Err(PackageError::MissingFiles {
                id: manifest.id,
                files: missing,
            });
        }
        Ok(manifest)
    }

    /// Load one package, reusing its cache slot when still valid
    ///
    /// Nothing is created on disk until the manifest has been validated.
    pub fn load(&self, package: &Path, tier: ProvenanceTier) -> Result<ExtractedPackage, PackageError> {
        let manifest = Self::read_manifest(package)?;
        let stamp = SourceStamp::of(package)?;
        let id = manifest.id.clone();

        fs::create_dir_all(&self.cache_root)?;
        let lock = self.acquire_lock(&id)?;

        let slot = self.cache_dir_for(&id);
        if cache::is_cache_hit(&slot, &manifest, stamp) {
            debug!(extension = %id, "Extraction cache hit");
            drop(lock);
            return Ok(ExtractedPackage {
                manifest,
                install_path: slot,
                source: package.to_path_buf(),
                tier,
                cache_hit: true,
            });
        }

        if slot.exists() {
            debug!(extension = %id, "Removing stale cache slot");
            fs::remove_dir_all(&slot)?;
        }

        let staging = self
            .cache_root
            .join(format!(".{id}.partial-{}", uuid::Uuid::new_v4()));
        let result = self
            .extract_into(package, &staging, &manifest)
            .and_then(|()| {
                ProvenanceRecord::new(&manifest.version, stamp).write(&staging)?;
                fs::rename(&staging, &slot)?;
                Ok(())
            });

        if let Err(e) = result {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(extension = %id, "Failed to clean up staging dir {:?}: {}", staging, cleanup);
                }
            }
            return Err(e);
        }
        drop(lock);

        info!(extension = %id, version = %manifest.version, "Extracted package");
        Ok(ExtractedPackage {
            manifest,
            install_path: slot,
            source: package.to_path_buf(),
            tier,
            cache_hit: false,
        })
    }

    /// Remove the cache slot of an extension
    pub fn invalidate(&self, id: &str) -> Result<(), PackageError> {
        let slot = self.cache_dir_for(id);
        if !slot.exists() {
            return Ok(());
        }
        let lock = self.acquire_lock(id)?;
        fs::remove_dir_all(&slot)?;
        drop(lock);
        debug!(extension = %id, "Invalidated cache slot");
        Ok(())
    }

    /// Load a batch of packages with bounded parallelism
    ///
    /// Output keeps input order. Each package is extracted on the blocking
    /// pool; a failure is recorded and the rest continue.
    pub async fn load_batch(&self, sources: Vec<PackageSource>, max_parallel: usize) -> BatchReport {
        let results: Vec<_> = stream::iter(sources.into_iter().map(|source| {
            let loader = self.clone();
            async move {
                let path = source.path.clone();
                let joined =
                    tokio::task::spawn_blocking(move || loader.load(&source.path, source.tier))
                        .await;
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => Err(PackageError::extraction(&path, format!("loader task failed: {e}"))),
                };
                (path, result)
            }
        }))
        .buffered(max_parallel.max(1))
        .collect()
        .await;

        let mut report = BatchReport::default();
        for (source, result) in results {
            match result {
                Ok(package) => report.loaded.push(package),
                Err(error) => {
                    warn!("Failed to load package {:?}: {}", source, error);
                    report.failures.push(PackageFailure { source, error });
                }
            }
        }
        report
    }

    fn acquire_lock(&self, id: &str) -> Result<File, PackageError> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path_for(id))?;
        // Released when the file is dropped
        file.lock_exclusive()?;
        Ok(file)
    }

    fn extract_into(&self, package: &Path, dest: &Path, manifest: &Manifest) -> Result<(), PackageError> {
        fs::create_dir_all(dest)?;

        let file = File::open(package)?;
        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        let entries = archive
            .entries()
            .map_err(|e| PackageError::extraction(package, e.to_string()))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| PackageError::extraction(package, e.to_string()))?;
            match entry.header().entry_type() {
                EntryType::Regular | EntryType::Directory => {}
                EntryType::Symlink | EntryType::Link => {
                    return Err(PackageError::extraction(package, "links are not allowed in packages"));
                }
                _ => continue,
            }
            let unpacked = entry
                .unpack_in(dest)
                .map_err(|e| PackageError::extraction(package, e.to_string()))?;
            if !unpacked {
                return Err(PackageError::extraction(package, "entry escapes the package root"));
            }
        }

        let missing = cache::missing_files(dest, manifest);
        if !missing.is_empty() {
            return Err(PackageError::MissingFiles {
                id: manifest.id.clone(),
                files: missing,
            });
        }
        Ok(())
    }
}

/// Archive path as a `/`-joined relative string, without `.` components
fn normalized(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
