//! File storage confined to one extension's directory

use annex_core::types::perms;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use super::{ContextError, Gate};

/// Storage handle rooted at `<storage-dir>/<extension-id>`
///
/// Every path argument is relative to the root. Absolute paths, prefixes
/// and `..` segments that climb above the root are rejected, and the
/// deepest existing ancestor is canonicalised so symlinks cannot lead out.
/// A dangling symlink anywhere on the path is rejected outright.
#[derive(Clone)]
pub struct StorageHandle {
    gate: Arc<Gate>,
    root: PathBuf,
}

impl StorageHandle {
    pub(crate) fn new(gate: Arc<Gate>, root: PathBuf) -> Self {
        Self { gate, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ContextError> {
        let escape = || ContextError::PathEscapesRoot {
            path: relative.to_string(),
        };

        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(escape());
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        let root = std::fs::canonicalize(&self.root)?;
        let mut existing = resolved.as_path();
        while std::fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Err(escape()),
            }
        }
        let canonical = match std::fs::canonicalize(existing) {
            Ok(canonical) => canonical,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(escape()),
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&root) {
            return Err(escape());
        }

        Ok(resolved)
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>, ContextError> {
        self.gate.check(perms::STORAGE_READ)?;
        let target = self.resolve(path)?;
        Ok(fs::read(target).await?)
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String, ContextError> {
        self.gate.check(perms::STORAGE_READ)?;
        let target = self.resolve(path)?;
        Ok(fs::read_to_string(target).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ContextError> {
        let raw = self.read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn exists(&self, path: &str) -> Result<bool, ContextError> {
        self.gate.check(perms::STORAGE_READ)?;
        let target = self.resolve(path)?;
        Ok(fs::try_exists(target).await?)
    }

    /// Entry names of a directory, sorted
    pub async fn list(&self, dir: &str) -> Result<Vec<String>, ContextError> {
        self.gate.check(perms::STORAGE_READ)?;
        let target = self.resolve(dir)?;
        let mut entries = fs::read_dir(target).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Write a file, creating parent directories inside the root
    pub async fn write(&self, path: &str, contents: &[u8]) -> Result<(), ContextError> {
        self.gate.check(perms::STORAGE_WRITE)?;
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(ContextError::InvalidName {
                name: path.to_string(),
            });
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(target, contents).await?;
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), ContextError> {
        let json = serde_json::to_vec_pretty(value)?;
        self.write(path, &json).await
    }

    /// Delete a file or directory tree; missing targets are not an error
    pub async fn delete(&self, path: &str) -> Result<(), ContextError> {
        self.gate.check(perms::STORAGE_WRITE)?;
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(ContextError::InvalidName {
                name: path.to_string(),
            });
        }
        match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await?,
            Ok(_) => fs::remove_file(&target).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
