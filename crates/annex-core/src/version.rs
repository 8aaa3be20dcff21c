//! Semantic-version precedence
//!
//! Precedence follows semver ordering for major, minor, patch and
//! pre-release identifiers. Build metadata is stripped before comparison
//! and never affects which of two versions wins.

use semver::{BuildMetadata, Version};
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Parse a version string against the `MAJOR.MINOR.PATCH[-pre][+build]` grammar
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version.trim()).map_err(|_| Error::invalid_version(version))
}

/// Check whether a version string is well formed
pub fn is_valid_version(version: &str) -> bool {
    parse_version(version).is_ok()
}

/// Compare two versions by precedence, ignoring build metadata
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    strip_build(a).cmp(&strip_build(b))
}

/// Compare two version strings by precedence
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(precedence(&parse_version(a)?, &parse_version(b)?))
}

/// True when `candidate` strictly outranks `current`
///
/// Ties (including versions that differ only in build metadata) keep the
/// current one.
pub fn is_strictly_newer(candidate: &Version, current: &Version) -> bool {
    precedence(candidate, current) == Ordering::Greater
}

fn strip_build(version: &Version) -> Version {
    Version {
        build: BuildMetadata::EMPTY,
        ..version.clone()
    }
}
