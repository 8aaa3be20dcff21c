//! Common test utilities for annex-extensions
//!
//! This module provides shared test infrastructure including:
//! - Constants
//! - Manifest builders
//! - Package and development-directory fixtures
//! - Mock extension definitions and services

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod builders;
pub mod constants;
pub mod fixtures;
pub mod mocks;

pub use builders::*;
pub use constants::*;
pub use fixtures::*;
pub use mocks::*;
