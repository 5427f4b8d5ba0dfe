//! Field-level encryption of record values.
//!
//! Ciphertexts are text so they can live in any record field:
//! `base64(nonce || ciphertext || tag)`.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::aead;
use crate::keys::{FieldKey, MasterKey};
use tethersync_common::{Error, Result};

/// Encrypts and decrypts individual field values.
pub trait FieldCipher: Send + Sync {
    /// Identifier written next to every ciphertext this cipher produces.
    fn key_id(&self) -> &str;

    /// Encrypt a plaintext field value.
    fn encrypt_field(&self, plaintext: &str) -> Result<String>;

    /// Decrypt a value produced by [`FieldCipher::encrypt_field`].
    fn decrypt_field(&self, ciphertext: &str) -> Result<String>;
}

/// XChaCha20-Poly1305 field cipher.
pub struct XChaChaFieldCipher {
    key: FieldKey,
    key_id: String,
}

impl XChaChaFieldCipher {
    pub fn new(key: FieldKey, key_id: impl Into<String>) -> Self {
        Self {
            key,
            key_id: key_id.into(),
        }
    }

    /// Derive the field key for `key_id` from a master key.
    pub fn from_master(master: &MasterKey, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        let key = master.derive_field_key(&key_id);
        Self { key, key_id }
    }
}

impl std::fmt::Debug for XChaChaFieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaChaFieldCipher")
            .field("key", &self.key)
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl FieldCipher for XChaChaFieldCipher {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        let sealed = aead::encrypt(self.key.as_bytes(), plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt_field(&self, ciphertext: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::Crypto(format!("Ciphertext is not valid base64: {}", e)))?;
        let plaintext = aead::decrypt(self.key.as_bytes(), &sealed)?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("Decrypted field is not valid UTF-8".to_string()))
    }
}
