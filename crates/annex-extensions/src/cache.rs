//! Extraction cache provenance
//!
//! Each extension id owns one cache slot. The slot carries a provenance
//! record describing the package it was extracted from; a slot is reused
//! only while the record and the on-disk files still match.

use annex_core::types::MANIFEST_FILE;
use annex_core::Manifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Provenance file written into every extracted slot
pub const PROVENANCE_FILE: &str = ".annex-provenance.json";

/// Size and modification time of a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub size: u64,
    pub mtime_ms: u64,
}

impl SourceStamp {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let mtime_ms = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            mtime_ms,
        })
    }
}

/// Record of one extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub version: String,
    pub source_size: u64,
    pub source_mtime_ms: u64,
    pub extracted_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(version: &str, stamp: SourceStamp) -> Self {
        Self {
            version: version.to_string(),
            source_size: stamp.size,
            source_mtime_ms: stamp.mtime_ms,
            extracted_at: Utc::now(),
        }
    }

    /// Read the record of a slot, if present and readable
    pub fn read(slot: &Path) -> Option<Self> {
        let raw = fs::read_to_string(slot.join(PROVENANCE_FILE)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Ignoring unreadable provenance in {:?}: {}", slot, e);
                None
            }
        }
    }

    pub fn write(&self, slot: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(slot.join(PROVENANCE_FILE), json)
    }

    /// Whether the record describes this exact version and source file
    pub fn matches(&self, version: &str, stamp: SourceStamp) -> bool {
        self.version == version
            && self.source_size == stamp.size
            && self.source_mtime_ms == stamp.mtime_ms
    }
}

/// Files that must exist in an extracted slot for the manifest
pub fn required_files(manifest: &Manifest) -> Vec<String> {
    let mut files = vec![MANIFEST_FILE.to_string()];
    files.extend(manifest.entry_points().into_iter().map(str::to_string));
    files
}

/// Required files absent from `root`
pub fn missing_files(root: &Path, manifest: &Manifest) -> Vec<String> {
    required_files(manifest)
        .into_iter()
        .filter(|rel| !relative_to(root, rel).is_file())
        .collect()
}

/// Check whether a slot can be reused without extraction
pub fn is_cache_hit(slot: &Path, manifest: &Manifest, stamp: SourceStamp) -> bool {
    let Some(record) = ProvenanceRecord::read(slot) else {
        return false;
    };
    if !record.matches(&manifest.version, stamp) {
        debug!(
            extension = %manifest.id,
            cached = %record.version,
            "Cache slot provenance differs"
        );
        return false;
    }
    missing_files(slot, manifest).is_empty()
}

fn relative_to(root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}
