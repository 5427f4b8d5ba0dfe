//! SQLite-based local store.
//!
//! Each synced table gets its own SQLite table holding one JSON document per
//! record. Identity lookups use `json_extract`, so heterogeneous table shapes
//! need no per-table schema.

use async_trait::async_trait;
use rusqlite::{params, types::Value as SqlValue, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::store::LocalStore;
use tethersync_common::types::validate_identifier;
use tethersync_common::{Error, FieldValue, LocalRecord, Result, TableName};

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Quoted SQLite identifier for a validated table name.
fn quoted(table: &TableName) -> String {
    format!("\"{}\"", table.as_str())
}

fn ensure_table(conn: &Connection, table: &TableName) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            record TEXT NOT NULL,
            inserted_at INTEGER NOT NULL
        );
        "#,
        quoted(table)
    ))
    .map_err(storage_err)
}

/// Bind a field value the way `json_extract` reports it.
fn sql_value(value: &FieldValue) -> SqlValue {
    match value {
        FieldValue::Null => SqlValue::Null,
        FieldValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        FieldValue::Integer(i) | FieldValue::Timestamp(i) => SqlValue::Integer(*i),
        FieldValue::Float(f) => SqlValue::Real(*f),
        FieldValue::Text(s) => SqlValue::Text(s.clone()),
        FieldValue::Json(v) => SqlValue::Text(v.to_string()),
    }
}

fn parse_row(raw: String) -> Result<LocalRecord> {
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    LocalRecord::from_json(value)
}

/// Local store backed by a SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(storage_err)?;
        info!("Local store opened at {}", db_path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The mutex makes this the single writer for the database.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("Store task failed: {}", e)))?
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_where(
        &self,
        table: &TableName,
        field: &str,
        value: &FieldValue,
    ) -> Result<Vec<LocalRecord>> {
        validate_identifier(field)?;
        let table = table.clone();
        let path = format!("$.\"{}\"", field);
        let bound = sql_value(value);

        self.with_conn(move |conn| {
            ensure_table(conn, &table)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT record FROM {} WHERE json_extract(record, ?1) = ?2 ORDER BY seq",
                    quoted(&table)
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![path, bound], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;

            let mut records = Vec::new();
            for raw in rows {
                records.push(parse_row(raw.map_err(storage_err)?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn write(&self, table: &TableName, records: Vec<LocalRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let table = table.clone();
        let rows = records
            .iter()
            .map(|r| serde_json::to_string(&r.to_json()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.with_conn(move |conn| {
            ensure_table(conn, &table)?;
            let now = chrono::Utc::now().timestamp_millis();
            let tx = conn.transaction().map_err(storage_err)?;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT INTO {} (record, inserted_at) VALUES (?1, ?2)",
                        quoted(&table)
                    ))
                    .map_err(storage_err)?;
                for row in &rows {
                    stmt.execute(params![row, now]).map_err(storage_err)?;
                }
            }
            tx.commit().map_err(storage_err)?;
            debug!("Wrote {} records to {}", rows.len(), table);
            Ok(rows.len())
        })
        .await
    }

    async fn scan(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LocalRecord>> {
        let table = table.clone();
        self.with_conn(move |conn| {
            ensure_table(conn, &table)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT record FROM {} ORDER BY seq LIMIT ?1 OFFSET ?2",
                    quoted(&table)
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(storage_err)?;

            let mut records = Vec::new();
            for raw in rows {
                records.push(parse_row(raw.map_err(storage_err)?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn count(&self, table: &TableName) -> Result<usize> {
        let table = table.clone();
        self.with_conn(move |conn| {
            ensure_table(conn, &table)?;
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", quoted(&table)), [], |row| {
                    row.get(0)
                })
                .map_err(storage_err)?;
            Ok(count as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn record(id: &str, job_id: &str) -> LocalRecord {
        let mut record = LocalRecord::new();
        record.insert("id", id.into());
        record.insert("job_id", job_id.into());
        record.insert("created_at", FieldValue::Timestamp(1_700_000_000_000));
        record.insert("payload_json", FieldValue::Json(json!({"steps": [1, 2]})));
        record
    }

    #[tokio::test]
    async fn test_write_and_find() {
        let store = SqliteStore::in_memory().unwrap();
        let jobs = table("ai_jobs");

        store
            .write(&jobs, vec![record("a", "j1"), record("b", "j2")])
            .await
            .unwrap();

        let found = store.find_where(&jobs, "job_id", &"j2".into()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("id"), Some(&FieldValue::Text("b".into())));
        assert_eq!(
            found[0].get("payload_json"),
            Some(&FieldValue::Json(json!({"steps": [1, 2]})))
        );

        let by_time = store
            .find_where(&jobs, "created_at", &FieldValue::Timestamp(1_700_000_000_000))
            .await
            .unwrap();
        assert_eq!(by_time.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table_is_empty() {
        let store = SqliteStore::in_memory().unwrap();
        let found = store
            .find_where(&table("messages"), "id", &"x".into())
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(store.count(&table("messages")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_field_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store
            .find_where(&table("messages"), "id') OR 1=1 --", &"x".into())
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_scan_preserves_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        let jobs = table("ai_jobs");
        for i in 0..5 {
            store
                .create(&jobs, record(&format!("r{}", i), "j"))
                .await
                .unwrap();
        }

        let page = store.scan(&jobs, 1, 2).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.get("id").cloned().unwrap()).collect();
        assert_eq!(ids, vec![FieldValue::from("r1"), FieldValue::from("r2")]);
        assert_eq!(store.count(&jobs).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.db");
        let jobs = table("ai_jobs");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create(&jobs, record("a", "j1")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count(&jobs).await.unwrap(), 1);
    }
}
