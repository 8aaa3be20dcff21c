//! Package loading integration tests
//!
//! Tests the package loader including:
//! - Extraction cache hits and misses keyed on size and modification time
//! - Rejection of invalid manifests before anything touches the cache
//! - Clean-up of partial extractions
//! - Verification of required files before a package is installed
//! - Tier overrides between release and pre-release versions
//! - Batch loading with per-package failure isolation

mod common;

use annex_core::ProvenanceTier;
use annex_extensions::cache::{self, ProvenanceRecord};
use annex_extensions::discovery::{Discovery, DiscoveryPaths};
use annex_extensions::package::PackageSource;
use annex_extensions::{
    InstallError, ManifestError, PackageError, PackageInstaller, PackageLoader, ValidationError,
};
use common::*;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn partial_dirs(cache_root: &Path) -> usize {
    fs::read_dir(cache_root)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().contains(".partial-"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_unchanged_package_is_cache_hit() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").renderer("dist/renderer").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));

    let first = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    assert!(!first.cache_hit);
    assert!(first.install_path.join("dist/renderer").is_file());

    let record = ProvenanceRecord::read(&first.install_path).unwrap();
    assert_eq!(record.version, "1.0.0");

    let second = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.install_path, first.install_path);
}

#[test]
fn test_mtime_change_forces_extraction() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));

    loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    touch_forward(&pkg, Duration::from_secs(60));

    let reloaded = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    assert!(!reloaded.cache_hit);
    assert!(loader.load(&pkg, ProvenanceTier::Packaged).unwrap().cache_hit);
}

#[test]
fn test_size_change_forces_extraction() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");
    let pinned = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    set_mtime(&pkg, pinned);
    let loader = PackageLoader::new(temp.path().join("cache"));
    loader.load(&pkg, ProvenanceTier::Packaged).unwrap();

    PackageBuilder::new(&manifest)
        .with_file("dist/extra.json", &[b'x'; 4096])
        .write(temp.path(), "notes.annex");
    set_mtime(&pkg, pinned);

    let reloaded = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    assert!(!reloaded.cache_hit);
    assert!(reloaded.install_path.join("dist/extra.json").is_file());
}

#[test]
fn test_damaged_slot_is_re_extracted() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));

    let first = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    fs::remove_file(first.install_path.join("dist/main")).unwrap();
    assert!(!cache::missing_files(&first.install_path, &manifest).is_empty());

    let second = loader.load(&pkg, ProvenanceTier::Packaged).unwrap();
    assert!(!second.cache_hit);
    assert!(cache::missing_files(&second.install_path, &manifest).is_empty());
}

#[test]
fn test_upgrade_overwrites_single_slot() {
    let temp = TempDir::new().unwrap();
    let loader = PackageLoader::new(temp.path().join("cache"));

    let v1 = ManifestBuilder::new("notes").version("1.0.0").build();
    let pkg = PackageBuilder::new(&v1).with_file("dist/old", b"old").write(temp.path(), "notes.annex");
    loader.load(&pkg, ProvenanceTier::UserInstalled).unwrap();

    let v2 = ManifestBuilder::new("notes").version("1.1.0").build();
    PackageBuilder::new(&v2).write(temp.path(), "notes.annex");
    let upgraded = loader.load(&pkg, ProvenanceTier::UserInstalled).unwrap();

    assert_eq!(upgraded.install_path, loader.cache_dir_for("notes"));
    assert_eq!(ProvenanceRecord::read(&upgraded.install_path).unwrap().version, "1.1.0");
    assert!(!upgraded.install_path.join("dist/old").exists());
}

#[test]
fn test_bad_id_rejected_before_extraction() {
    let temp = TempDir::new().unwrap();
    let pkg = PackageBuilder::raw(r#"{"id":"Bad_ID!","version":"1.0.0","name":"Bad"}"#)
        .write(temp.path(), "bad.annex");
    let cache_root = temp.path().join("cache");
    let loader = PackageLoader::new(&cache_root);

    let err = loader.load(&pkg, ProvenanceTier::UserInstalled).unwrap_err();
    match err {
        PackageError::Validation(ManifestError::Invalid(errors)) => {
            assert!(errors.contains(&ValidationError::InvalidId("Bad_ID!".into())));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!cache_root.exists());
}

#[test]
fn test_bad_version_and_entry_rejected() {
    let temp = TempDir::new().unwrap();
    let cache_root = temp.path().join("cache");
    let loader = PackageLoader::new(&cache_root);

    let bad_version = PackageBuilder::raw(r#"{"id":"notes","version":"one","name":"Notes"}"#)
        .write(temp.path(), "v.annex");
    assert!(matches!(
        loader.load(&bad_version, ProvenanceTier::Packaged),
        Err(PackageError::Validation(_))
    ));

    let traversal =
        PackageBuilder::raw(r#"{"id":"notes","version":"1.0.0","name":"Notes","main":"../../bin/sh"}"#)
            .write(temp.path(), "t.annex");
    assert!(matches!(
        loader.load(&traversal, ProvenanceTier::Packaged),
        Err(PackageError::Validation(_))
    ));
    assert!(!cache_root.exists());
}

#[test]
fn test_missing_manifest_is_fatal_for_package() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest)
        .without_manifest()
        .write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));
    assert!(matches!(
        loader.load(&pkg, ProvenanceTier::Packaged),
        Err(PackageError::MissingManifest(_))
    ));
}

#[test]
fn test_missing_renderer_leaves_nothing_behind() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").renderer("dist/renderer").build();
    let pkg = PackageBuilder::new(&manifest)
        .without_file("dist/renderer")
        .write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));

    let err = loader.load(&pkg, ProvenanceTier::Packaged).unwrap_err();
    assert!(matches!(err, PackageError::MissingFiles { ref id, .. } if id == "notes"));
    assert!(!loader.cache_dir_for("notes").exists());
    assert_eq!(partial_dirs(loader.cache_root()), 0);
}

#[test]
fn test_install_rejects_package_without_main() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest)
        .without_file("dist/main")
        .write(temp.path(), "notes-1.0.0.annex");
    let user_dir = temp.path().join("extensions");
    let installer = PackageInstaller::new(
        &user_dir,
        temp.path().join("data"),
        PackageLoader::new(temp.path().join("cache")),
    );

    let err = PackageLoader::verify(&pkg).unwrap_err();
    assert!(matches!(err, PackageError::MissingFiles { ref files, .. } if files == &["dist/main".to_string()]));

    let err = installer.install(&pkg).unwrap_err();
    assert!(matches!(
        err,
        InstallError::Package(PackageError::MissingFiles { ref id, .. }) if id == "notes"
    ));
    assert!(!user_dir.join("notes.annex").exists());
    assert!(!temp.path().join("data").join("installed.yaml").exists());
}

#[test]
fn test_verify_accepts_complete_package() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").renderer("dist/renderer").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");

    let verified = PackageLoader::verify(&pkg).unwrap();
    assert_eq!(verified.id, "notes");
    assert!(!temp.path().join("cache").exists());
}

#[test]
fn test_non_package_file_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("notes.zip");
    fs::write(&path, b"PK\x03\x04").unwrap();
    let loader = PackageLoader::new(temp.path().join("cache"));
    assert!(matches!(
        loader.load(&path, ProvenanceTier::Packaged),
        Err(PackageError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_release_preferred_over_prerelease_across_tiers() {
    let temp = TempDir::new().unwrap();
    let packaged = temp.path().join("packaged");
    let user = temp.path().join("user");

    let beta = ManifestBuilder::new("notes").version("1.2.0-beta").build();
    let release = ManifestBuilder::new("notes").version("1.2.0").build();

    PackageBuilder::new(&beta).write(&packaged, "notes.annex");
    PackageBuilder::new(&release).write(&user, "notes.annex");
    let report = Discovery::new(DiscoveryPaths {
        dev_dirs: Vec::new(),
        packaged_dirs: vec![packaged.clone()],
        user_dir: Some(user.clone()),
    })
    .scan();
    assert_eq!(report.selected.len(), 1);
    assert_eq!(report.selected[0].manifest.version, "1.2.0");
    assert_eq!(report.selected[0].tier, ProvenanceTier::UserInstalled);

    PackageBuilder::new(&release).write(&packaged, "notes.annex");
    PackageBuilder::new(&beta).write(&user, "notes.annex");
    let report = Discovery::new(DiscoveryPaths {
        dev_dirs: Vec::new(),
        packaged_dirs: vec![packaged],
        user_dir: Some(user),
    })
    .scan();
    assert_eq!(report.selected[0].manifest.version, "1.2.0");
    assert_eq!(report.selected[0].tier, ProvenanceTier::Packaged);
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("packages");
    let good_a = PackageBuilder::new(&ManifestBuilder::new("alpha").build()).write(&dir, "alpha.annex");
    let broken = PackageBuilder::raw(r#"{"id":"Nope!","version":"1.0.0","name":"Nope"}"#)
        .write(&dir, "broken.annex");
    let good_b = PackageBuilder::new(&ManifestBuilder::new("beta").build()).write(&dir, "beta.annex");
    let incomplete = PackageBuilder::new(&ManifestBuilder::new("gamma").build())
        .without_file("dist/main")
        .write(&dir, "gamma.annex");

    let loader = PackageLoader::new(temp.path().join("cache"));
    let sources = [good_a, broken.clone(), good_b, incomplete.clone()]
        .into_iter()
        .map(|path| PackageSource {
            path,
            tier: ProvenanceTier::Packaged,
        })
        .collect();

    let report = loader.load_batch(sources, 2).await;
    let loaded: Vec<_> = report.loaded.iter().map(|p| p.manifest.id.as_str()).collect();
    assert_eq!(loaded, vec!["alpha", "beta"]);

    let failed: Vec<_> = report.failures.iter().map(|f| f.source.clone()).collect();
    assert_eq!(failed, vec![broken, incomplete]);
    assert!(!loader.cache_dir_for("gamma").exists());
}

#[test]
fn test_concurrent_loads_of_same_package() {
    let temp = TempDir::new().unwrap();
    let manifest = ManifestBuilder::new("notes").build();
    let pkg = PackageBuilder::new(&manifest).write(temp.path(), "notes.annex");
    let loader = PackageLoader::new(temp.path().join("cache"));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            let pkg = pkg.clone();
            std::thread::spawn(move || loader.load(&pkg, ProvenanceTier::Packaged))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().all(|r| r.is_ok()));
    let extractions = results
        .iter()
        .filter(|r| matches!(r, Ok(p) if !p.cache_hit))
        .count();
    assert_eq!(extractions, 1);
    assert_eq!(partial_dirs(loader.cache_root()), 0);
}
