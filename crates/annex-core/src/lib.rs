//! # annex-core
//!
//! Core library for the Annex extension runtime providing:
//! - The typed extension manifest and permission model
//! - Semantic-version precedence used by tier overrides
//! - Hierarchical runtime configuration (embedded defaults, file, env)
//! - Shared error type and path helpers

pub mod config;
pub mod error;
pub mod types;
pub mod utils;
pub mod version;

pub use config::ConfigLoader;
pub use error::{Error, Result};
pub use types::{Manifest, ProvenanceTier, RuntimeConfig, RuntimeMode};
pub use utils::{annex_home, get_home_dir};
