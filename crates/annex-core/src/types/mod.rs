//! Type definitions for Annex

pub mod manifest_types;
pub mod permission_types;
pub mod runtime_config;

pub use manifest_types::*;
pub use permission_types::*;
pub use runtime_config::*;
