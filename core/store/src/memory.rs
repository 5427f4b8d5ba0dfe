//! In-memory local store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::store::LocalStore;
use tethersync_common::types::validate_identifier;
use tethersync_common::{Error, FieldValue, LocalRecord, Result, TableName};

/// In-memory local store.
///
/// Can simulate failing lookups, rejected records and a broken store.
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Vec<LocalRecord>>>,
    fail_lookups: AtomicBool,
    reject_writes: AtomicBool,
    broken: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            fail_lookups: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Make every lookup fail with a storage error.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Reject every written record as invalid.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make every write fail with a storage error.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Snapshot of a table's records.
    pub fn records(&self, table: &str) -> Vec<LocalRecord> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_where(
        &self,
        table: &TableName,
        field: &str,
        value: &FieldValue,
    ) -> Result<Vec<LocalRecord>> {
        validate_identifier(field)?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Storage("lookup failed".to_string()));
        }

        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(table.as_str())
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(field).is_some_and(|v| v.store_eq(value)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write(&self, table: &TableName, records: Vec<LocalRecord>) -> Result<usize> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Storage("store is unavailable".to_string()));
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::InvalidInput(format!("record rejected by {}", table)));
        }

        let written = records.len();
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(records);
        Ok(written)
    }

    async fn scan(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LocalRecord>> {
        Ok(self
            .records(table.as_str())
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, table: &TableName) -> Result<usize> {
        Ok(self.records(table.as_str()).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_find_matches_timestamp_as_integer() {
        let store = MemoryStore::new();
        let mut record = LocalRecord::new();
        record.insert("id", FieldValue::Integer(7));
        store.create(&table("embeddings"), record).await.unwrap();

        let found = store
            .find_where(&table("embeddings"), "id", &FieldValue::Timestamp(7))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.set_fail_lookups(true);
        assert!(store
            .find_where(&table("messages"), "id", &"x".into())
            .await
            .is_err());

        store.set_reject_writes(true);
        let err = store
            .create(&table("messages"), LocalRecord::new())
            .await
            .unwrap_err();
        assert!(err.is_record_level());

        store.set_broken(true);
        let err = store
            .create(&table("messages"), LocalRecord::new())
            .await
            .unwrap_err();
        assert!(!err.is_record_level());
    }
}
