//! Extension discovery across provenance tiers
//!
//! Tiers are scanned highest priority first: development directories, then
//! executable-adjacent package directories, then the user extensions
//! directory. A development copy wins over everything. Otherwise a later
//! candidate replaces an accepted one only when its version is strictly
//! newer.

use annex_core::types::MANIFEST_FILE;
use annex_core::version::{is_strictly_newer, parse_version};
use annex_core::{Manifest, ProvenanceTier, RuntimeConfig};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::manifest;
use crate::package::PackageLoader;

/// Directories scanned for extensions
#[derive(Debug, Clone, Default)]
pub struct DiscoveryPaths {
    pub dev_dirs: Vec<PathBuf>,
    pub packaged_dirs: Vec<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl DiscoveryPaths {
    /// Paths derived from configuration and the running executable
    pub fn from_config(config: &RuntimeConfig, home: &Path) -> Self {
        Self {
            dev_dirs: config.paths.dev_dirs.clone(),
            packaged_dirs: executable_adjacent_dirs(),
            user_dir: Some(config.paths.extensions_dir(home)),
        }
    }
}

/// `extensions` next to the executable, and one level up for relocatable layouts
fn executable_adjacent_dirs() -> Vec<PathBuf> {
    let Ok(exe) = std::env::current_exe() else {
        return Vec::new();
    };
    let Some(dir) = exe.parent() else {
        return Vec::new();
    };
    let mut dirs = vec![dir.join("extensions")];
    if let Some(parent) = dir.parent() {
        dirs.push(parent.join("extensions"));
    }
    dirs
}

/// Where a candidate lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    /// Unpacked extension directory, used in place
    Directory(PathBuf),
    /// Package archive, to be extracted into the cache
    Package(PathBuf),
}

impl CandidateSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(p) | Self::Package(p) => p,
        }
    }
}

/// One discovered extension
#[derive(Debug, Clone)]
pub struct Candidate {
    pub manifest: Manifest,
    pub source: CandidateSource,
    pub tier: ProvenanceTier,
}

/// Something found on disk that could not be used
#[derive(Debug, Clone)]
pub struct DiscoveryFailure {
    pub source: PathBuf,
    pub error: String,
}

/// Scan result after applying override rules
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub selected: Vec<Candidate>,
    pub superseded: Vec<Candidate>,
    pub failures: Vec<DiscoveryFailure>,
}

/// Scans discovery paths
#[derive(Debug, Clone)]
pub struct Discovery {
    paths: DiscoveryPaths,
}

impl Discovery {
    pub fn new(paths: DiscoveryPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &DiscoveryPaths {
        &self.paths
    }

    /// Scan every tier and resolve overrides
    pub fn scan(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut found = Vec::new();

        for dir in &self.paths.dev_dirs {
            scan_dev_dir(dir, &mut found, &mut report.failures);
        }
        for dir in &self.paths.packaged_dirs {
            scan_package_dir(dir, ProvenanceTier::Packaged, &mut found, &mut report.failures);
        }
        if let Some(dir) = &self.paths.user_dir {
            scan_package_dir(dir, ProvenanceTier::UserInstalled, &mut found, &mut report.failures);
        }

        let (selected, superseded) = resolve_overrides(found);
        info!(
            selected = selected.len(),
            superseded = superseded.len(),
            failures = report.failures.len(),
            "Discovery finished"
        );
        report.selected = selected;
        report.superseded = superseded;
        report
    }
}

/// Apply the override policy to candidates given in scan order
///
/// Returns `(selected, superseded)`; selected keeps first-seen order.
pub fn resolve_overrides(candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Candidate>) {
    let mut order: Vec<String> = Vec::new();
    let mut accepted: HashMap<String, Candidate> = HashMap::new();
    let mut superseded = Vec::new();

    for candidate in candidates {
        let id = candidate.manifest.id.clone();
        let Some(current) = accepted.get(&id) else {
            order.push(id.clone());
            accepted.insert(id, candidate);
            continue;
        };

        if replaces(&candidate, current) {
            debug!(
                extension = %id,
                from = %current.manifest.version,
                to = %candidate.manifest.version,
                tier = %candidate.tier,
                "Candidate overrides accepted extension"
            );
            if let Some(old) = accepted.insert(id, candidate) {
                superseded.push(old);
            }
        } else {
            debug!(
                extension = %id,
                version = %candidate.manifest.version,
                tier = %candidate.tier,
                "Candidate does not override accepted extension"
            );
            superseded.push(candidate);
        }
    }

    let selected = order
        .into_iter()
        .filter_map(|id| accepted.remove(&id))
        .collect();
    (selected, superseded)
}

fn replaces(candidate: &Candidate, current: &Candidate) -> bool {
    match (candidate.tier, current.tier) {
        (_, ProvenanceTier::Development) => false,
        (ProvenanceTier::Development, _) => true,
        _ => match (
            parse_version(&candidate.manifest.version),
            parse_version(&current.manifest.version),
        ) {
            (Ok(new), Ok(old)) => is_strictly_newer(&new, &old),
            _ => false,
        },
    }
}

fn scan_dev_dir(dir: &Path, found: &mut Vec<Candidate>, failures: &mut Vec<DiscoveryFailure>) {
    if !dir.is_dir() {
        debug!("Development directory {:?} does not exist", dir);
        return;
    }

    if dir.join(MANIFEST_FILE).is_file() {
        push_dev_candidate(dir, found, failures);
        return;
    }

    for sub in sorted_entries(dir) {
        if sub.is_dir() && sub.join(MANIFEST_FILE).is_file() {
            push_dev_candidate(&sub, found, failures);
        }
    }
}

fn push_dev_candidate(dir: &Path, found: &mut Vec<Candidate>, failures: &mut Vec<DiscoveryFailure>) {
    let result = fs::read_to_string(dir.join(MANIFEST_FILE))
        .map_err(|e| e.to_string())
        .and_then(|raw| manifest::parse(&raw).map_err(|e| e.to_string()));
    match result {
        Ok(manifest) => found.push(Candidate {
            manifest,
            source: CandidateSource::Directory(dir.to_path_buf()),
            tier: ProvenanceTier::Development,
        }),
        Err(error) => {
            warn!("Skipping development extension {:?}: {}", dir, error);
            failures.push(DiscoveryFailure {
                source: dir.to_path_buf(),
                error,
            });
        }
    }
}

fn scan_package_dir(
    dir: &Path,
    tier: ProvenanceTier,
    found: &mut Vec<Candidate>,
    failures: &mut Vec<DiscoveryFailure>,
) {
    if !dir.is_dir() {
        debug!("{} directory {:?} does not exist", tier, dir);
        return;
    }

    for path in sorted_entries(dir) {
        if !path.is_file() || !PackageLoader::is_package_file(&path) {
            continue;
        }
        match PackageLoader::read_manifest(&path) {
            Ok(manifest) => found.push(Candidate {
                manifest,
                source: CandidateSource::Package(path),
                tier,
            }),
            Err(e) => {
                warn!("Skipping package {:?}: {}", path, e);
                failures.push(DiscoveryFailure {
                    source: path,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            warn!("Failed to read {:?}: {}", dir, e);
            Vec::new()
        }
    };
    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn candidate(id: &str, version: &str, tier: ProvenanceTier) -> Candidate {
        Candidate {
            manifest: serde_json::from_value(serde_json::json!({
                "id": id, "version": version, "name": id
            }))
            .unwrap(),
            source: CandidateSource::Package(PathBuf::from(format!("{id}-{version}.annex"))),
            tier,
        }
    }

    #[test]
    fn test_release_beats_prerelease() {
        let (selected, superseded) = resolve_overrides(vec![
            candidate("notes", "1.2.0-beta", ProvenanceTier::Packaged),
            candidate("notes", "1.2.0", ProvenanceTier::UserInstalled),
        ]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].manifest.version, "1.2.0");
        assert_eq!(superseded[0].manifest.version, "1.2.0-beta");

        let (selected, _) = resolve_overrides(vec![
            candidate("notes", "1.2.0", ProvenanceTier::Packaged),
            candidate("notes", "1.2.0-beta", ProvenanceTier::UserInstalled),
        ]);
        assert_eq!(selected[0].manifest.version, "1.2.0");
    }

    #[test]
    fn test_equal_version_keeps_first() {
        let (selected, _) = resolve_overrides(vec![
            candidate("notes", "1.0.0", ProvenanceTier::Packaged),
            candidate("notes", "1.0.0+build.7", ProvenanceTier::UserInstalled),
        ]);
        assert_eq!(selected[0].tier, ProvenanceTier::Packaged);
    }

    #[test]
    fn test_development_overrides_newer() {
        let (selected, _) = resolve_overrides(vec![
            candidate("notes", "0.1.0", ProvenanceTier::Development),
            candidate("notes", "9.0.0", ProvenanceTier::Packaged),
        ]);
        assert_eq!(selected[0].tier, ProvenanceTier::Development);
        assert_eq!(selected[0].manifest.version, "0.1.0");
    }

    #[test]
    fn test_selected_keeps_first_seen_order() {
        let (selected, _) = resolve_overrides(vec![
            candidate("b", "1.0.0", ProvenanceTier::Packaged),
            candidate("a", "1.0.0", ProvenanceTier::Packaged),
            candidate("b", "2.0.0", ProvenanceTier::UserInstalled),
        ]);
        let ids: Vec<_> = selected.iter().map(|c| c.manifest.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(selected[0].manifest.version, "2.0.0");
    }

    #[test]
    fn test_scan_dev_dir_parent_and_single() {
        let temp = TempDir::new().unwrap();
        let parent = temp.path().join("dev");
        for id in ["alpha", "beta"] {
            let dir = parent.join(id);
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join(MANIFEST_FILE),
                format!(r#"{{"id":"{id}","version":"0.0.1","name":"{id}"}}"#),
            )
            .unwrap();
        }
        let broken = parent.join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(MANIFEST_FILE), "{").unwrap();

        let discovery = Discovery::new(DiscoveryPaths {
            dev_dirs: vec![parent.clone(), parent.join("alpha")],
            ..Default::default()
        });
        let report = discovery.scan();
        let ids: Vec<_> = report.selected.iter().map(|c| c.manifest.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert_eq!(report.superseded.len(), 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_missing_dirs_are_ignored() {
        let discovery = Discovery::new(DiscoveryPaths {
            dev_dirs: vec![PathBuf::from("/definitely/not/here")],
            packaged_dirs: vec![PathBuf::from("/also/not/here")],
            user_dir: None,
        });
        let report = discovery.scan();
        assert!(report.selected.is_empty());
        assert!(report.failures.is_empty());
    }
}
