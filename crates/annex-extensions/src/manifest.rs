//! Manifest parsing and validation
//!
//! Validation is pure: it never touches the filesystem. It enforces the
//! identifier and version grammars, the permission table, and the entry-point
//! allow-list that keeps entry paths inside the package root.

use annex_core::types::{is_recognised_permission, Manifest};
use annex_core::version::is_valid_version;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z0-9-]+$").unwrap()
});

static ENTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^dist(/[A-Za-z0-9_-]+)+(\.[A-Za-z0-9]+)?$").unwrap()
});

/// A single manifest validation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid identifier '{0}': must match ^[a-z0-9-]+$")]
    InvalidId(String),

    #[error("invalid version '{0}': expected MAJOR.MINOR.PATCH[-prerelease][+build]")]
    InvalidVersion(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("unknown permission '{0}'")]
    UnknownPermission(String),

    #[error("invalid dependency identifier '{0}'")]
    InvalidDependency(String),

    #[error("extension '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("{field} entry point '{path}' is not an allowed relative path")]
    InvalidEntryPoint { field: &'static str, path: String },
}

/// Manifest could not be turned into a valid [`Manifest`]
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest validation failed: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse and validate raw manifest JSON
pub fn parse(raw: &str) -> Result<Manifest, ManifestError> {
    let manifest: Manifest = serde_json::from_str(raw)?;
    let errors = validate(&manifest);
    if errors.is_empty() {
        Ok(manifest)
    } else {
        Err(ManifestError::Invalid(errors))
    }
}

/// Collect every validation failure of a manifest
pub fn validate(manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !is_valid_id(&manifest.id) {
        errors.push(ValidationError::InvalidId(manifest.id.clone()));
    }

    if !is_valid_version(&manifest.version) {
        errors.push(ValidationError::InvalidVersion(manifest.version.clone()));
    }

    if manifest.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    for permission in &manifest.permissions {
        if !is_recognised_permission(permission) {
            errors.push(ValidationError::UnknownPermission(permission.clone()));
        }
    }

    for dep in &manifest.dependencies {
        if !is_valid_id(dep) {
            errors.push(ValidationError::InvalidDependency(dep.clone()));
        } else if dep == &manifest.id {
            errors.push(ValidationError::SelfDependency(dep.clone()));
        }
    }

    if !is_allowed_entry_path(&manifest.main) {
        errors.push(ValidationError::InvalidEntryPoint {
            field: "main",
            path: manifest.main.clone(),
        });
    }
    if let Some(renderer) = &manifest.renderer {
        if !is_allowed_entry_path(renderer) {
            errors.push(ValidationError::InvalidEntryPoint {
                field: "renderer",
                path: renderer.clone(),
            });
        }
    }

    errors
}

/// Check the identifier grammar
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Check an entry path against the allow-list
pub fn is_allowed_entry_path(path: &str) -> bool {
    ENTRY_PATTERN.is_match(path)
}

/// Entry point that passed the allow-list and is anchored at a package root
///
/// This is the only way the runtime hands a filesystem location to an
/// [`crate::EntryLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPath {
    relative: String,
    absolute: PathBuf,
}

impl EntryPath {
    pub fn resolve(root: &Path, relative: &str) -> Result<Self, ValidationError> {
        if !is_allowed_entry_path(relative) {
            return Err(ValidationError::InvalidEntryPoint {
                field: "entry",
                path: relative.to_string(),
            });
        }
        let absolute = relative
            .split('/')
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment));
        Ok(Self {
            relative: relative.to_string(),
            absolute,
        })
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn path(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json(id: &str, version: &str) -> String {
        format!(r#"{{"id":"{id}","version":"{version}","name":"Test"}}"#)
    }

    #[test]
    fn test_parse_minimal() {
        let manifest = parse(&manifest_json("notes", "1.0.0")).unwrap();
        assert_eq!(manifest.id, "notes");
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("notes"));
        assert!(is_valid_id("web-search-2"));
        assert!(is_valid_id("2fa"));
        assert!(!is_valid_id("Bad_ID!"));
        assert!(!is_valid_id("Notes"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a b"));
    }

    #[test]
    fn test_invalid_id_and_version_are_both_reported() {
        let err = parse(&manifest_json("Bad_ID!", "1.0")).unwrap_err();
        match err {
            ManifestError::Invalid(errors) => {
                assert!(errors.contains(&ValidationError::InvalidId("Bad_ID!".into())));
                assert!(errors.contains(&ValidationError::InvalidVersion("1.0".into())));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let raw = r#"{"id":"a","version":"1.0.0","name":"A","permissions":["llm:chat","camera:snap"]}"#;
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("camera:snap"));
    }

    #[test]
    fn test_wildcard_and_all_accepted() {
        let raw = r#"{"id":"a","version":"1.0.0","name":"A","permissions":["vectordb:*","all"]}"#;
        assert!(parse(raw).is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let raw = r#"{"id":"a","version":"1.0.0","name":"A","dependencies":["a"]}"#;
        let errors = validate(&serde_json::from_str(raw).unwrap());
        assert_eq!(errors, vec![ValidationError::SelfDependency("a".into())]);
    }

    #[test]
    fn test_entry_path_allow_list() {
        assert!(is_allowed_entry_path("dist/main"));
        assert!(is_allowed_entry_path("dist/main.js"));
        assert!(is_allowed_entry_path("dist/renderer/index.mjs"));
        assert!(!is_allowed_entry_path("/etc/passwd"));
        assert!(!is_allowed_entry_path("dist/../../etc/passwd"));
        assert!(!is_allowed_entry_path("dist/./main"));
        assert!(!is_allowed_entry_path("src/main.js"));
        assert!(!is_allowed_entry_path("dist"));
        assert!(!is_allowed_entry_path("dist\\main"));
    }

    #[test]
    fn test_traversal_entry_rejected_in_manifest() {
        let raw = r#"{"id":"a","version":"1.0.0","name":"A","main":"../outside.js"}"#;
        let errors = validate(&serde_json::from_str(raw).unwrap());
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidEntryPoint { field: "main", .. }]
        ));
    }

    #[test]
    fn test_entry_path_resolves_under_root() {
        let entry = EntryPath::resolve(Path::new("/cache/notes"), "dist/main.js").unwrap();
        assert_eq!(entry.path(), Path::new("/cache/notes/dist/main.js"));
        assert_eq!(entry.relative(), "dist/main.js");
        assert!(EntryPath::resolve(Path::new("/cache/notes"), "../x").is_err());
    }
}
