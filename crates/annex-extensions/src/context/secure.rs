//! Secure storage handle backed by the host secret store

use annex_core::types::perms;
use annex_secrets::{SecretStore, SecureString};
use std::sync::Arc;

use super::{ContextError, Gate};

#[derive(Clone)]
pub struct SecureHandle {
    gate: Arc<Gate>,
    store: Arc<dyn SecretStore>,
}

impl SecureHandle {
    pub(crate) fn new(gate: Arc<Gate>, store: Arc<dyn SecretStore>) -> Self {
        Self { gate, store }
    }

    /// Whether the platform offers real secret storage
    pub fn is_available(&self) -> bool {
        self.store.is_available()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ContextError> {
        self.gate.check(perms::SECURE_ENCRYPT)?;
        Ok(self.store.encrypt(plaintext)?)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<SecureString, ContextError> {
        self.gate.check(perms::SECURE_DECRYPT)?;
        Ok(self.store.decrypt(ciphertext)?)
    }
}
