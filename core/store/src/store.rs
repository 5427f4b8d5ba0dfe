//! Local store trait definition.

use async_trait::async_trait;

use tethersync_common::{FieldValue, LocalRecord, Result, TableName};

/// Local store trait for the client-side persistent store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Store name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Records of `table` whose `field` equals `value`.
    ///
    /// A table that has never been written to yields no records.
    ///
    /// # Errors
    /// - `field` is not a plain identifier
    /// - Storage failure
    async fn find_where(
        &self,
        table: &TableName,
        field: &str,
        value: &FieldValue,
    ) -> Result<Vec<LocalRecord>>;

    /// Append records to `table` in one write transaction.
    ///
    /// # Postconditions
    /// - Either every record is persisted or none is
    ///
    /// # Errors
    /// - `Error::Serialization` / `Error::InvalidInput` if a record is rejected
    /// - `Error::Storage` if the store itself failed
    async fn write(&self, table: &TableName, records: Vec<LocalRecord>) -> Result<usize>;

    /// Append a single record.
    async fn create(&self, table: &TableName, record: LocalRecord) -> Result<()> {
        self.write(table, vec![record]).await.map(|_| ())
    }

    /// Records of `table` in insertion order.
    async fn scan(&self, table: &TableName, offset: usize, limit: usize)
        -> Result<Vec<LocalRecord>>;

    /// Number of records in `table`.
    async fn count(&self, table: &TableName) -> Result<usize>;
}
