//! In-memory remote backend for testing and development.
//!
//! Besides holding tables, it can simulate the failure modes the sync engine
//! must absorb: an unreachable backend, failing pages and stale counts.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crate::backend::{OrderBy, RemoteBackend, SortDirection};
use tethersync_common::{Error, RemoteRecord, Result, TableName};

/// A ranged select as observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub table: String,
    pub offset: usize,
    pub limit: usize,
}

/// In-memory remote backend.
///
/// All data is stored in memory and lost on drop.
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, Vec<RemoteRecord>>>,
    reachable: AtomicBool,
    secure: bool,
    failing_pages: Mutex<HashSet<(String, usize)>>,
    offline_pages: Mutex<HashSet<(String, usize)>>,
    count_overrides: Mutex<HashMap<String, usize>>,
    range_log: Mutex<Vec<RangeRequest>>,
    ping_count: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    /// Create a new empty, reachable backend.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            secure: true,
            failing_pages: Mutex::new(HashSet::new()),
            offline_pages: Mutex::new(HashSet::new()),
            count_overrides: Mutex::new(HashMap::new()),
            range_log: Mutex::new(Vec::new()),
            ping_count: AtomicUsize::new(0),
        }
    }

    /// Report the transport as unencrypted.
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    /// Create a table (empty if it does not exist yet).
    pub fn create_table(&self, table: &str) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default();
    }

    /// Append records to a table, creating it if needed.
    pub fn seed(&self, table: &str, records: impl IntoIterator<Item = RemoteRecord>) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(records);
    }

    /// Snapshot of a table's records.
    pub fn records(&self, table: &str) -> Vec<RemoteRecord> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, AtomicOrdering::SeqCst);
    }

    /// Make the page of `table` starting at `offset` fail with a remote error.
    pub fn fail_page(&self, table: &str, offset: usize) {
        locked(&self.failing_pages).insert((table.to_string(), offset));
    }

    /// Make the page of `table` starting at `offset` fail as unreachable.
    pub fn drop_page(&self, table: &str, offset: usize) {
        locked(&self.offline_pages).insert((table.to_string(), offset));
    }

    /// Forget every injected page failure.
    pub fn clear_page_failures(&self) {
        locked(&self.failing_pages).clear();
        locked(&self.offline_pages).clear();
    }

    /// Report `count` for `table` regardless of its actual size.
    pub fn override_count(&self, table: &str, count: usize) {
        locked(&self.count_overrides).insert(table.to_string(), count);
    }

    /// Ranged selects served so far, in order.
    pub fn range_requests(&self) -> Vec<RangeRequest> {
        locked(&self.range_log).clone()
    }

    /// Ranged selects served so far for one table.
    pub fn range_requests_for(&self, table: &str) -> Vec<RangeRequest> {
        locked(&self.range_log)
            .iter()
            .filter(|r| r.table == table)
            .cloned()
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.ping_count.load(AtomicOrdering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("memory backend is unreachable".to_string()))
        }
    }

    fn table_records(&self, table: &TableName) -> Result<Vec<RemoteRecord>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Table not found: {}", table)))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Order JSON values: nulls first, then booleans, numbers, strings, others.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn sort_records(records: &mut [RemoteRecord], order_by: Option<&OrderBy>) {
    if let Some(order) = order_by {
        records.sort_by(|a, b| {
            let ordering = compare_values(a.get(&order.column), b.get(&order.column));
            match order.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    async fn ping(&self) -> Result<()> {
        self.ping_count.fetch_add(1, AtomicOrdering::SeqCst);
        self.ensure_reachable()
    }

    async fn count(&self, table: &TableName) -> Result<usize> {
        self.ensure_reachable()?;
        if let Some(count) = locked(&self.count_overrides).get(table.as_str()) {
            return Ok(*count);
        }
        Ok(self.table_records(table)?.len())
    }

    async fn select_range(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>> {
        self.ensure_reachable()?;
        locked(&self.range_log).push(RangeRequest {
            table: table.to_string(),
            offset,
            limit,
        });

        let key = (table.to_string(), offset);
        if locked(&self.offline_pages).contains(&key) {
            return Err(Error::Network(format!(
                "connection reset while reading {} at offset {}",
                table, offset
            )));
        }
        if locked(&self.failing_pages).contains(&key) {
            return Err(Error::Remote(format!(
                "query failed for {} at offset {}",
                table, offset
            )));
        }

        let mut records = self.table_records(table)?;
        sort_records(&mut records, order_by);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn select_where(
        &self,
        table: &TableName,
        field: &str,
        value: &Value,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>> {
        self.ensure_reachable()?;
        let mut records: Vec<RemoteRecord> = self
            .table_records(table)?
            .into_iter()
            .filter(|r| r.get(field) == Some(value))
            .collect();
        sort_records(&mut records, order_by);
        Ok(records)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.ensure_reachable()?;
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn insert(&self, table: &TableName, records: Vec<RemoteRecord>) -> Result<()> {
        self.ensure_reachable()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get_mut(table.as_str())
            .ok_or_else(|| Error::NotFound(format!("Table not found: {}", table)))?;
        rows.extend(records);
        Ok(())
    }
}
