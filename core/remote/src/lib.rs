//! Remote backend abstraction for Tethersync.
//!
//! This module provides a trait-based interface to the hosted relational
//! backend that is the source of truth for synced tables, together with:
//! - a PostgREST-style HTTP implementation
//! - an in-memory implementation for tests and local development
//!
//! # Design Principles
//! - Backend isolation: no HTTP details leak into the sync engine
//! - Async operations: every call is a suspension point
//! - Unified error semantics: unreachable backends always report
//!   `Error::Network`, which the sync engine routes to its offline queue

pub mod backend;
pub mod memory;
pub mod rest;

pub use backend::{OrderBy, RemoteBackend, SortDirection};
pub use memory::MemoryBackend;
pub use rest::{RestBackend, RestConfig};
