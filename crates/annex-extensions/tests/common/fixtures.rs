//! Package and development-directory fixtures
//!
//! Packages are gzip tarballs built in-test; nothing is read from disk
//! fixtures.

#![allow(dead_code)]

use annex_core::types::MANIFEST_FILE;
use annex_core::Manifest;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Builder for `.annex` package fixtures
pub struct PackageBuilder {
    manifest_json: String,
    files: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    /// Package with the manifest and every entry point it declares
    pub fn new(manifest: &Manifest) -> Self {
        let manifest_json = serde_json::to_string_pretty(manifest).unwrap_or_default();
        let files = manifest
            .entry_points()
            .into_iter()
            .map(|entry| (entry.to_string(), format!("// {entry}").into_bytes()))
            .collect();
        Self { manifest_json, files }
    }

    /// Package whose manifest is taken verbatim, with a main entry
    pub fn raw(manifest_json: &str) -> Self {
        Self {
            manifest_json: manifest_json.to_string(),
            files: vec![("dist/main".to_string(), b"// main".to_vec())],
        }
    }

    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.push((path.to_string(), contents.to_vec()));
        self
    }

    pub fn without_file(mut self, path: &str) -> Self {
        self.files.retain(|(p, _)| p != path);
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.manifest_json.clear();
        self
    }

    /// Write the package into `dir` and return its path
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(file_name);
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        if !self.manifest_json.is_empty() {
            append(&mut builder, MANIFEST_FILE, self.manifest_json.as_bytes());
        }
        for (name, body) in &self.files {
            append(&mut builder, name, body);
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, name: &str, body: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, body).unwrap();
}

/// Lay out an unpacked development extension under `parent/<id>`
pub fn write_dev_extension(parent: &Path, manifest: &Manifest) -> PathBuf {
    let dir = parent.join(&manifest.id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(manifest).unwrap(),
    )
    .unwrap();
    for entry in manifest.entry_points() {
        let path = dir.join(entry);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("// {entry}")).unwrap();
    }
    dir
}

/// Move a file's modification time by `offset`
pub fn touch_forward(path: &Path, offset: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    let modified = fs::metadata(path).unwrap().modified().unwrap();
    file.set_modified(modified + offset).unwrap();
}

/// Pin a file's modification time
pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}
