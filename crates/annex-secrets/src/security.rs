//! Zeroizing string for decrypted secret values
//!
//! Plaintext leaves a [`SecretStore`](crate::SecretStore) only as a
//! [`SecureString`]. Extensions receive it through their secure context and
//! can read it, but formatting it for logs or diagnostics never shows the
//! value.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A decrypted secret that is zeroed on drop
///
/// `Debug` reports only the length and `Display` prints `[REDACTED]`, so a
/// stray `{:?}` in a tracing call cannot leak the value.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Wrap an owned string without copying it
    pub fn new(value: String) -> Self {
        Self { inner: value }
    }

    /// Take ownership of decrypted bytes
    ///
    /// On invalid UTF-8 the bytes are zeroed before the error is returned.
    pub fn from_utf8(bytes: Vec<u8>) -> Result<Self, std::str::Utf8Error> {
        String::from_utf8(bytes).map(Self::new).map_err(|e| {
            let utf8 = e.utf8_error();
            e.into_bytes().zeroize();
            utf8
        })
    }

    /// Get the string value (use with caution)
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Convert to owned String (consumes self)
    ///
    /// The returned string is no longer zeroed on drop.
    pub fn into_string(mut self) -> String {
        std::mem::take(&mut self.inner)
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString([REDACTED {} bytes])", self.len())
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}
