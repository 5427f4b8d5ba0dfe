//! Key file kept next to the local database.
//!
//! Holds the KDF salt and parameters plus a check value, so the same
//! passphrase always yields the same field key and a wrong one is caught
//! before anything is written.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroize;

use tethersync_crypto::{derive_key, FieldCipher, KdfParams, Salt, XChaChaFieldCipher};

const CHECK_PLAINTEXT: &str = "tethersync-key-check";

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    salt: Salt,
    kdf: KdfParams,
    key_id: String,
    check: String,
}

/// Path of the key file belonging to `db_path`.
pub fn key_file_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".keys.json");
    db_path.with_file_name(name)
}

/// Build the field cipher for `key_id`, creating the key file on first use.
pub fn load_or_create_cipher(
    db_path: &Path,
    key_id: &str,
    passphrase: &[u8],
    params: KdfParams,
) -> Result<Arc<dyn FieldCipher>> {
    let path = key_file_path(db_path);

    if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: KeyFile = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed key file {}", path.display()))?;
        if file.key_id != key_id {
            bail!(
                "Key file {} is for key id {:?}, configuration asks for {:?}",
                path.display(),
                file.key_id,
                key_id
            );
        }

        let master = derive_key(passphrase, &file.salt, &file.kdf)?;
        let cipher = XChaChaFieldCipher::from_master(&master, key_id);
        match cipher.decrypt_field(&file.check) {
            Ok(plain) if plain == CHECK_PLAINTEXT => Ok(Arc::new(cipher)),
            _ => bail!("Wrong passphrase for {}", path.display()),
        }
    } else {
        let salt = Salt::generate();
        let master = derive_key(passphrase, &salt, &params)?;
        let cipher = XChaChaFieldCipher::from_master(&master, key_id);
        let file = KeyFile {
            salt,
            kdf: params,
            key_id: key_id.to_string(),
            check: cipher.encrypt_field(CHECK_PLAINTEXT)?,
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Arc::new(cipher))
    }
}

/// Passphrase from `TETHERSYNC_PASSPHRASE` or an interactive prompt.
pub fn read_passphrase() -> Result<Vec<u8>> {
    if let Ok(mut value) = std::env::var("TETHERSYNC_PASSPHRASE") {
        let bytes = value.as_bytes().to_vec();
        value.zeroize();
        return Ok(bytes);
    }
    let password = rpassword::prompt_password("Encryption passphrase: ")
        .context("Failed to read passphrase")?;
    Ok(password.into_bytes())
}
