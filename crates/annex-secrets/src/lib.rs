//! Secret storage for Annex
//!
//! This crate provides:
//! - The [`SecretStore`] contract consumed by extension secure-storage handles
//! - [`KeyFileStore`], a local ChaCha20-Poly1305 store keyed by a file
//! - [`UnavailableStore`] for hosts without a secret backend
//! - [`SecureString`], a zeroize-on-drop string for decrypted values

pub mod local;
pub mod security;
pub mod store;

pub use local::KeyFileStore;
pub use security::SecureString;
pub use store::{SecretError, SecretStore, UnavailableStore};
