//! Permission checks for a single extension
//!
//! Grants come from the manifest. `category:*` covers every action of the
//! category; `all` is honoured only in development mode.

use annex_core::types::{Manifest, PermissionSpec};
use annex_core::RuntimeMode;
use thiserror::Error;

/// Raised when an extension calls a service it was not granted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("extension '{extension_id}' lacks permission '{permission}'")]
pub struct PermissionDenied {
    pub extension_id: String,
    pub permission: String,
}

/// Permission validator bound to one extension
#[derive(Debug, Clone)]
pub struct PermissionValidator {
    extension_id: String,
    grants: Vec<PermissionSpec>,
    mode: RuntimeMode,
}

impl PermissionValidator {
    pub fn new(manifest: &Manifest, mode: RuntimeMode) -> Self {
        Self::from_permissions(&manifest.id, &manifest.permissions, mode)
    }

    pub fn from_permissions<S: AsRef<str>>(
        extension_id: &str,
        permissions: &[S],
        mode: RuntimeMode,
    ) -> Self {
        let grants = permissions
            .iter()
            .filter_map(|p| PermissionSpec::parse(p.as_ref()))
            .filter(PermissionSpec::is_known)
            .collect();
        Self {
            extension_id: extension_id.to_string(),
            grants,
            mode,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Check a `category:action` permission
    pub fn has_permission(&self, permission: &str) -> bool {
        let Some((category, action)) = permission.split_once(':') else {
            return false;
        };
        self.grants.iter().any(|grant| match grant {
            PermissionSpec::All => self.mode.is_development(),
            PermissionSpec::Wildcard { category: c } => c == category,
            PermissionSpec::Exact {
                category: c,
                action: a,
            } => c == category && a == action,
        })
    }

    pub fn require_permission(&self, permission: &str) -> Result<(), PermissionDenied> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::debug!(extension = %self.extension_id, permission, "Permission denied");
            Err(PermissionDenied {
                extension_id: self.extension_id.clone(),
                permission: permission.to_string(),
            })
        }
    }

    /// Declared grants, normalised
    pub fn grants(&self) -> Vec<String> {
        self.grants.iter().map(|g| g.to_string()).collect()
    }
}
