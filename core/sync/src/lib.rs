//! Offline-first sync engine for Tethersync.
//!
//! This crate keeps a local store consistent with a hosted backend:
//! - Connection monitoring with a fixed-interval reconnect timer
//! - An offline queue replayed in order on reconnect, with per-entry backoff
//! - Paged pulls with per-record deduplication and shape conversion
//! - Field-level encryption before records reach the local store
//! - Push of local records the backend does not have yet
//! - Discovery of remote tables that are not configured

pub mod config;
pub mod connection;
pub mod fetcher;
pub mod gate;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod retry;

pub use config::{ExistencePolicy, SyncConfig, SyncDirection, SyncTarget};
pub use connection::{ConnectionMonitor, ConnectionState};
pub use fetcher::{BatchFetcher, Page, PageCursor};
pub use gate::{FieldEncryptionGate, GateOutcome};
pub use orchestrator::{RunState, SyncOrchestrator, SyncOutcome, SyncRunResult};
pub use progress::{ProgressReporter, SyncProgress};
pub use queue::{DrainHalt, DrainReport, OfflineQueue, QueuedOperation};
pub use reconciler::RecordReconciler;
pub use registry::TableRegistry;
pub use retry::{RetryConfig, RetryExecutor};

pub use tokio_util::sync::CancellationToken;
