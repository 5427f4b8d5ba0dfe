//! Remote backend trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use tethersync_common::{Error, RemoteRecord, Result, TableName};

/// Sort direction for ranged selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Ordering applied to ranged selects so that pages are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.column, self.direction.as_str())
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    /// Parse `column` or `column.asc` / `column.desc`.
    fn from_str(s: &str) -> Result<Self> {
        let (column, direction) = match s.rsplit_once('.') {
            Some((column, "asc")) => (column, SortDirection::Asc),
            Some((column, "desc")) => (column, SortDirection::Desc),
            _ => (s, SortDirection::Asc),
        };
        tethersync_common::types::validate_identifier(column)?;
        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }
}

/// Remote backend trait for the hosted relational data service.
///
/// Implementations must report an unreachable backend as `Error::Network`
/// and any answered-but-failed request as another error variant.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Backend name (e.g., "rest", "memory").
    fn name(&self) -> &str;

    /// Whether the transport to the backend is encrypted.
    fn is_secure(&self) -> bool;

    /// Lightweight reachability check.
    async fn ping(&self) -> Result<()>;

    /// Total number of records in a table.
    async fn count(&self, table: &TableName) -> Result<usize>;

    /// Fetch up to `limit` records starting at `offset`.
    ///
    /// # Postconditions
    /// - Records are returned in `order_by` order when one is given
    /// - An offset past the end yields an empty page, not an error
    async fn select_range(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>>;

    /// Fetch records whose `field` equals `value`.
    async fn select_where(
        &self,
        table: &TableName,
        field: &str,
        value: &Value,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>>;

    /// Names of all tables in the backend's catalog.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Insert records into a table.
    async fn insert(&self, table: &TableName, records: Vec<RemoteRecord>) -> Result<()>;
}
