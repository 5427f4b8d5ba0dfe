//! Common error types for Tethersync.

use thiserror::Error;

/// Top-level error type for Tethersync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote backend could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote backend answered, but with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Another operation holds the resource; try again later.
    #[error("Busy: {0}")]
    Busy(String),
}

impl Error {
    /// Whether this error means the remote backend is unreachable.
    ///
    /// Connectivity errors are never surfaced to sync callers; the pending
    /// operation is handed to the offline queue instead.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Whether this error rejects a single record rather than the store.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::Serialization(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
