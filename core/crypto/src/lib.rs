//! Cryptographic primitives for Tethersync.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Secure key management with automatic zeroization
//! - Field-level encryption of record values
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod field;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use field::{FieldCipher, XChaChaFieldCipher};
pub use kdf::{derive_key, KdfParams};
pub use keys::{FieldKey, MasterKey, Salt};
