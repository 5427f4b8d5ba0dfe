//! Field-level encryption applied before records reach the local store.
//!
//! A sensitive field `name` is replaced by `name_encrypted` (the ciphertext)
//! and `name_encrypted_key_id` (the key identifier). Failures are per field:
//! the field stays as it was and a warning is returned with the record.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use tethersync_common::{FieldValue, LocalRecord, TableName};
use tethersync_crypto::FieldCipher;

const ENCRYPTED_SUFFIX: &str = "_encrypted";
const KEY_ID_SUFFIX: &str = "_encrypted_key_id";

/// A record after the gate, with any per-field problems.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub record: LocalRecord,
    pub warnings: Vec<String>,
}

impl GateOutcome {
    fn clean(record: LocalRecord) -> Self {
        Self {
            record,
            warnings: Vec::new(),
        }
    }
}

/// Encrypts configured sensitive fields per table.
pub struct FieldEncryptionGate {
    cipher: Option<Arc<dyn FieldCipher>>,
    sensitive_fields: BTreeMap<String, Vec<String>>,
}

impl FieldEncryptionGate {
    pub fn new(
        cipher: Arc<dyn FieldCipher>,
        sensitive_fields: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            cipher: Some(cipher),
            sensitive_fields,
        }
    }

    /// A gate that passes every record through untouched.
    pub fn disabled() -> Self {
        Self {
            cipher: None,
            sensitive_fields: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Sensitive fields of `table`; empty for unlisted tables.
    pub fn sensitive_fields(&self, table: &TableName) -> &[String] {
        self.sensitive_fields
            .get(table.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace sensitive plaintext fields with ciphertext.
    pub fn encrypt(&self, mut record: LocalRecord, table: &TableName) -> GateOutcome {
        let Some(cipher) = &self.cipher else {
            return GateOutcome::clean(record);
        };
        let mut warnings = Vec::new();

        for field in self.sensitive_fields(table) {
            let Some(plaintext) = record.get(field).and_then(plaintext_of) else {
                continue;
            };
            match cipher.encrypt_field(&plaintext) {
                Ok(ciphertext) => {
                    record.remove(field);
                    record.insert(
                        format!("{}{}", field, ENCRYPTED_SUFFIX),
                        FieldValue::Text(ciphertext),
                    );
                    record.insert(
                        format!("{}{}", field, KEY_ID_SUFFIX),
                        FieldValue::Text(cipher.key_id().to_string()),
                    );
                }
                Err(e) => {
                    let message = format!("{}.{}: encryption failed: {}", table, field, e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        GateOutcome { record, warnings }
    }

    /// Restore plaintext for sensitive fields encrypted with this key.
    pub fn decrypt(&self, mut record: LocalRecord, table: &TableName) -> GateOutcome {
        let Some(cipher) = &self.cipher else {
            return GateOutcome::clean(record);
        };
        let mut warnings = Vec::new();

        for field in self.sensitive_fields(table) {
            let encrypted_field = format!("{}{}", field, ENCRYPTED_SUFFIX);
            let key_id_field = format!("{}{}", field, KEY_ID_SUFFIX);
            let Some(ciphertext) = record
                .get(&encrypted_field)
                .and_then(FieldValue::as_str)
                .map(str::to_string)
            else {
                continue;
            };

            let key_id = record.get(&key_id_field).and_then(FieldValue::as_str);
            if key_id != Some(cipher.key_id()) {
                let message = format!(
                    "{}.{}: encrypted with key {:?}, current key is {:?}",
                    table,
                    field,
                    key_id.unwrap_or("<none>"),
                    cipher.key_id()
                );
                warn!("{}", message);
                warnings.push(message);
                continue;
            }

            match cipher.decrypt_field(&ciphertext) {
                Ok(plaintext) => {
                    record.remove(&encrypted_field);
                    record.remove(&key_id_field);
                    record.insert(field.clone(), restore(field, plaintext));
                }
                Err(e) => {
                    let message = format!("{}.{}: decryption failed: {}", table, field, e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        GateOutcome { record, warnings }
    }
}

/// Text to encrypt for a field value, if it carries any.
fn plaintext_of(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Text(s) if s.is_empty() => None,
        FieldValue::Text(s) => Some(s.clone()),
        other => Some(other.to_json().to_string()),
    }
}

fn restore(field: &str, plaintext: String) -> FieldValue {
    if field.ends_with("_json") {
        if let Ok(value) = serde_json::from_str(&plaintext) {
            return FieldValue::Json(value);
        }
    }
    FieldValue::Text(plaintext)
}
