//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use tethersync_common::types::validate_identifier;
use tethersync_common::{Error, Result, TableName};
use tethersync_remote::OrderBy;

use crate::retry::RetryConfig;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_KEY_ID: &str = "local-v1";

/// Environment variable overriding [`SyncConfig::remote_url`].
pub const ENV_REMOTE_URL: &str = "TETHERSYNC_REMOTE_URL";
/// Environment variable overriding [`SyncConfig::remote_key`].
pub const ENV_REMOTE_KEY: &str = "TETHERSYNC_REMOTE_KEY";

/// Which way records flow for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    #[default]
    Pull,
    Push,
    Bidirectional,
}

impl SyncDirection {
    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::Pull | SyncDirection::Bidirectional)
    }

    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::Push | SyncDirection::Bidirectional)
    }
}

/// A table taking part in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub table: TableName,
    #[serde(default)]
    pub direction: SyncDirection,
    /// Page size; the config-wide `batch_size` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Ordering for ranged selects. Without one, page boundaries depend on
    /// the backend's natural order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
}

impl SyncTarget {
    pub fn pull(table: TableName) -> Self {
        Self {
            table,
            direction: SyncDirection::Pull,
            batch_size: None,
            order_by: None,
        }
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Effective page size, never zero.
    pub fn page_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }
}

/// What the reconciler does when the local existence lookup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePolicy {
    /// Treat the record as new and insert it.
    #[default]
    FailOpen,
    /// Count the record as failed and leave it for the next run.
    FailClosed,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the hosted backend.
    pub remote_url: String,
    /// API key sent with every request.
    pub remote_key: String,
    /// Default page size.
    pub batch_size: usize,
    /// Retries for transient remote errors; also the number of doublings
    /// after which queue backoff saturates.
    pub retry_attempts: u32,
    /// Connection probe interval and backoff base.
    pub retry_delay_ms: u64,
    pub enable_encryption: bool,
    /// Pause between successive page fetches.
    pub page_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub existence_policy: ExistencePolicy,
    /// Sync tables found remotely but missing from `tables`.
    pub adopt_discovered_tables: bool,
    /// Catalog entries with these prefixes are never discovered.
    pub ignored_table_prefixes: Vec<String>,
    /// Tables in sync order.
    pub tables: Vec<SyncTarget>,
    /// Sensitive field names per table.
    pub sensitive_fields: BTreeMap<String, Vec<String>>,
    /// Key identifier written beside each ciphertext.
    pub key_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            remote_key: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: 3,
            retry_delay_ms: 5000,
            enable_encryption: true,
            page_delay_ms: 100,
            request_timeout_ms: 30_000,
            existence_policy: ExistencePolicy::FailOpen,
            adopt_discovered_tables: false,
            ignored_table_prefixes: vec!["_".to_string(), "pg_".to_string()],
            tables: default_tables(),
            sensitive_fields: default_sensitive_fields(),
            key_id: DEFAULT_KEY_ID.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `TETHERSYNC_REMOTE_URL` / `TETHERSYNC_REMOTE_KEY` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_REMOTE_URL) {
            if !url.is_empty() {
                self.remote_url = url;
            }
        }
        if let Ok(key) = std::env::var(ENV_REMOTE_KEY) {
            if !key.is_empty() {
                self.remote_key = key;
            }
        }
        self
    }

    pub fn with_remote(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self.remote_key = key.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.enable_encryption = enabled;
        self
    }

    pub fn with_page_delay_ms(mut self, delay_ms: u64) -> Self {
        self.page_delay_ms = delay_ms;
        self
    }

    pub fn with_existence_policy(mut self, policy: ExistencePolicy) -> Self {
        self.existence_policy = policy;
        self
    }

    pub fn with_adopt_discovered_tables(mut self, adopt: bool) -> Self {
        self.adopt_discovered_tables = adopt;
        self
    }

    pub fn with_tables(mut self, tables: Vec<SyncTarget>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_sensitive_fields(
        mut self,
        table: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.sensitive_fields
            .insert(table.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Keep only the named tables, in configured order.
    pub fn restrict_to(mut self, names: &[TableName]) -> Result<Self> {
        for name in names {
            if !self.tables.iter().any(|t| &t.table == name) {
                return Err(Error::NotFound(format!("table {} is not configured", name)));
            }
        }
        self.tables.retain(|t| names.contains(&t.table));
        Ok(self)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// In-place retries for transient remote failures.
    pub fn remote_retry(&self) -> RetryConfig {
        RetryConfig::new(self.retry_attempts).with_initial_delay(self.retry_delay().min(
            Duration::from_secs(1),
        ))
    }

    /// Per-entry backoff for the offline queue.
    pub fn queue_backoff(&self) -> RetryConfig {
        RetryConfig::saturating(self.retry_attempts, self.retry_delay())
    }

    /// Check the parts of the configuration the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::Config(
                "retry_delay_ms must be at least 1".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for target in &self.tables {
            if !seen.insert(target.table.as_str()) {
                return Err(Error::Config(format!(
                    "table {} is configured twice",
                    target.table
                )));
            }
            if target.batch_size == Some(0) {
                return Err(Error::Config(format!(
                    "table {}: batch_size must be at least 1",
                    target.table
                )));
            }
        }
        for (table, fields) in &self.sensitive_fields {
            validate_identifier(table)
                .map_err(|e| Error::Config(format!("sensitive_fields: {}", e)))?;
            for field in fields {
                validate_identifier(field)
                    .map_err(|e| Error::Config(format!("sensitive_fields.{}: {}", table, e)))?;
            }
        }
        if self.enable_encryption && self.key_id.trim().is_empty() {
            return Err(Error::Config(
                "key_id must be set when encryption is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the remote endpoint is configured.
    pub fn validate_remote(&self) -> Result<()> {
        if self.remote_url.trim().is_empty() {
            return Err(Error::Config(format!(
                "remote_url is not set (config file or {})",
                ENV_REMOTE_URL
            )));
        }
        if self.remote_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "remote_key is not set (config file or {})",
                ENV_REMOTE_KEY
            )));
        }
        Ok(())
    }
}

fn target(name: &str, direction: SyncDirection, order_by: Option<&str>) -> Option<SyncTarget> {
    let table = TableName::new(name).ok()?;
    Some(SyncTarget {
        table,
        direction,
        batch_size: None,
        order_by: order_by.map(OrderBy::asc),
    })
}

/// Tables of the client application, in sync order.
pub fn default_tables() -> Vec<SyncTarget> {
    use SyncDirection::*;
    [
        target("user_profiles", Bidirectional, None),
        target("conversations", Bidirectional, Some("created_at")),
        target("messages", Bidirectional, Some("created_at")),
        target("journal_entries", Bidirectional, Some("created_at")),
        target("assessment_results", Pull, Some("created_at")),
        target("coaching_sessions", Pull, Some("created_at")),
        target("ai_jobs", Pull, None),
        target("content_items", Pull, None),
        target("embeddings", Pull, None),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Fields that never reach the local store in plaintext.
pub fn default_sensitive_fields() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 7] = [
        ("user_profiles", &["email", "display_name"]),
        ("conversations", &["title"]),
        ("messages", &["content"]),
        ("journal_entries", &["content", "mood_notes"]),
        ("assessment_results", &["answers_json"]),
        ("coaching_sessions", &["notes", "summary"]),
        ("ai_jobs", &["prompt", "result"]),
    ];
    entries
        .into_iter()
        .map(|(table, fields)| {
            (
                table.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect()
}
