//! Test constants for annex-extensions tests

#![allow(dead_code)]

use std::time::Duration;

/// Hook timeout used by registries in tests
pub const TEST_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that expect a hook to hang
pub const SHORT_HOOK_TIMEOUT: Duration = Duration::from_millis(100);

/// Default test extension version
pub const TEST_VERSION: &str = "1.0.0";

/// Traversal attempts every storage handle must reject
pub const TRAVERSAL_PATHS: &[&str] = &[
    "../etc/passwd",
    "../../etc/passwd",
    "../../../etc/passwd",
    "../../../../../../../../etc/passwd",
    "notes/../../secret",
    "a/b/c/../../../../escape",
    "/etc/passwd",
];
