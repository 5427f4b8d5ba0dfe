//! Common utilities and types shared across Tethersync modules.
//!
//! This module provides the foundational types used throughout the codebase:
//! the error taxonomy, validated table names and the typed record shapes
//! exchanged between the remote backend, the sync engine and the local store.

pub mod error;
pub mod record;
pub mod types;

pub use error::{Error, Result};
pub use record::{FieldValue, LocalRecord, RemoteRecord, IDENTITY_CANDIDATES};
pub use types::TableName;
