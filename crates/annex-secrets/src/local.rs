//! Local key-file secret store
//!
//! Values are sealed with ChaCha20-Poly1305 under a 256-bit key kept in a
//! file next to the host's data. Ciphertexts are rendered as
//! `v1:<base64(nonce || ciphertext)>`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::security::SecureString;
use crate::store::{SecretError, SecretStore};

/// Size of the data key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits for ChaCha20-Poly1305)
const NONCE_SIZE: usize = 12;

const CIPHERTEXT_PREFIX: &str = "v1:";

/// Secret store backed by a key file
pub struct KeyFileStore {
    key: Zeroizing<[u8; KEY_SIZE]>,
    key_path: PathBuf,
}

impl KeyFileStore {
    /// Open the key at `key_path`, generating it on first use
    pub fn open_or_create(key_path: &Path) -> Result<Self, SecretError> {
        let key = if key_path.exists() {
            Self::read_key(key_path)?
        } else {
            info!("Generating secret key at {:?}", key_path);
            let mut key = Zeroizing::new([0u8; KEY_SIZE]);
            rand::rng().fill_bytes(key.as_mut());
            Self::write_key(key_path, key.as_ref())?;
            key
        };

        Ok(Self {
            key,
            key_path: key_path.to_path_buf(),
        })
    }

    /// Build a store from raw key material
    pub fn from_raw_key(key_bytes: &[u8]) -> Result<Self, SecretError> {
        if key_bytes.len() != KEY_SIZE {
            return Err(SecretError::Key(format!(
                "Key must be {} bytes, got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(key_bytes);
        Ok(Self {
            key,
            key_path: PathBuf::new(),
        })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    fn read_key(path: &Path) -> Result<Zeroizing<[u8; KEY_SIZE]>, SecretError> {
        let encoded = Zeroizing::new(
            fs::read_to_string(path)
                .map_err(|e| SecretError::Key(format!("Failed to read key file: {e}")))?,
        );
        let decoded = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| SecretError::Key(format!("Key file is not base64: {e}")))?,
        );
        if decoded.len() != KEY_SIZE {
            return Err(SecretError::Key(format!(
                "Key file holds {} bytes, expected {}",
                decoded.len(),
                KEY_SIZE
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&decoded);
        debug!("Loaded secret key from {:?}", path);
        Ok(key)
    }

    fn write_key(path: &Path, key: &[u8]) -> Result<(), SecretError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SecretError::Key(format!("Failed to create key dir: {e}")))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(path)
            .map_err(|e| SecretError::Key(format!("Failed to create key file: {e}")))?;
        let encoded = Zeroizing::new(BASE64.encode(key));
        file.write_all(encoded.as_bytes())
            .map_err(|e| SecretError::Key(format!("Failed to write key file: {e}")))?;
        Ok(())
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_ref()))
    }
}

impl SecretStore for KeyFileStore {
    fn is_available(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{CIPHERTEXT_PREFIX}{}", BASE64.encode(sealed)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<SecureString, SecretError> {
        let encoded = ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| SecretError::Decrypt("unrecognised ciphertext format".into()))?;
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| SecretError::Decrypt(format!("invalid base64: {e}")))?;
        if sealed.len() <= NONCE_SIZE {
            return Err(SecretError::Decrypt("ciphertext too short".into()));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| SecretError::Decrypt(e.to_string()))?;

        SecureString::from_utf8(plaintext)
            .map_err(|_| SecretError::Decrypt("plaintext is not UTF-8".into()))
    }
}
