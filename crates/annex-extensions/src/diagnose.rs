//! Extension diagnostics
//!
//! A diagnosis combines structural checks the runtime can make on its own
//! (files on disk, dependencies, permissions) with the extension's optional
//! self-check. Extensions without a self-check are healthy by default.

use annex_core::types::is_recognised_permission;
use annex_core::ProvenanceTier;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache;
use crate::definition::LoadedExtension;

/// Overall health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Check {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: String::new(),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Status, message and checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub status: HealthStatus,
    pub message: String,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl Diagnosis {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            checks: Vec::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            checks: Vec::new(),
        }
    }
}

/// Diagnosis of one extension as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionReport {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ProvenanceTier>,
    pub active: bool,
    #[serde(flatten)]
    pub diagnosis: Diagnosis,
}

/// Structural checks for a loaded extension
///
/// `is_registered` answers whether a dependency id is present in the
/// registry.
pub fn structural_checks(
    extension: &LoadedExtension,
    is_registered: impl Fn(&str) -> bool,
) -> Vec<Check> {
    let manifest = &extension.manifest;
    let mut checks = Vec::with_capacity(3);

    let missing = cache::missing_files(&extension.install_path, manifest);
    checks.push(if missing.is_empty() {
        Check::pass("files")
    } else {
        Check::fail("files", format!("missing: {}", missing.join(", ")))
    });

    let unresolved: Vec<_> = manifest
        .dependencies
        .iter()
        .filter(|d| !is_registered(d.as_str()))
        .cloned()
        .collect();
    checks.push(if unresolved.is_empty() {
        Check::pass("dependencies")
    } else {
        Check::fail("dependencies", format!("not registered: {}", unresolved.join(", ")))
    });

    let unknown: Vec<_> = manifest
        .permissions
        .iter()
        .filter(|p| !is_recognised_permission(p.as_str()))
        .cloned()
        .collect();
    checks.push(if unknown.is_empty() {
        Check::pass("permissions")
    } else {
        Check::fail("permissions", format!("unknown: {}", unknown.join(", ")))
    });

    checks
}

/// Combine structural checks with an optional self-check
pub fn combine(structural: Vec<Check>, self_check: Option<Diagnosis>, active: bool) -> Diagnosis {
    let mut status = HealthStatus::Healthy;
    let mut problems = Vec::new();

    for check in structural.iter().filter(|c| !c.passed) {
        let severity = if check.name == "dependencies" {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        status = status.max(severity);
        problems.push(format!("{}: {}", check.name, check.message));
    }

    if !active {
        status = status.max(HealthStatus::Degraded);
        problems.push("not active".to_string());
    }

    let mut checks = structural;
    let message = match self_check {
        Some(own) => {
            status = status.max(own.status);
            checks.extend(own.checks);
            if problems.is_empty() {
                own.message
            } else {
                format!("{}; {}", problems.join("; "), own.message)
            }
        }
        None if problems.is_empty() => "no self-check; healthy by default".to_string(),
        None => problems.join("; "),
    };

    Diagnosis {
        status,
        message,
        checks,
    }
}

/// Diagnosis for an extension that failed before registration
pub fn failed_before_registration(reason: &str) -> Diagnosis {
    let mut diagnosis = Diagnosis::unhealthy(reason);
    diagnosis.checks.push(Check::fail("load", reason));
    diagnosis
}
