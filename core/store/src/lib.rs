//! Embedded local store for Tethersync.
//!
//! The local store is where synced records end up on the client. It is
//! append-only from the sync engine's point of view: records are created and
//! looked up, never updated or deleted.
//!
//! Writers are serialized here, at the storage layer: every call to
//! [`LocalStore::write`] is one transaction that is applied completely or
//! not at all.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::LocalStore;
