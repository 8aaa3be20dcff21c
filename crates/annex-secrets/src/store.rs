//! Secret store contract

use thiserror::Error;

use crate::security::SecureString;

/// Errors returned by a secret store
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret store is not available on this platform")]
    Unavailable,

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Secret key error: {0}")]
    Key(String),
}

/// Host platform secret store
///
/// Implementations must be safe to share between every extension's
/// runtime context; ciphertexts are opaque strings.
pub trait SecretStore: Send + Sync {
    /// Whether encryption is backed by a real secret
    fn is_available(&self) -> bool;

    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;

    fn decrypt(&self, ciphertext: &str) -> Result<SecureString, SecretError>;
}

/// Store used when the platform offers no secret backend
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl SecretStore for UnavailableStore {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &str) -> Result<String, SecretError> {
        Err(SecretError::Unavailable)
    }

    fn decrypt(&self, _ciphertext: &str) -> Result<SecureString, SecretError> {
        Err(SecretError::Unavailable)
    }
}
