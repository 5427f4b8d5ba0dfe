//! Deduplication and shape conversion between remote and local records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use tethersync_common::{FieldValue, LocalRecord, RemoteRecord, Result, TableName};
use tethersync_store::LocalStore;

use crate::config::ExistencePolicy;

/// Epoch values below this are seconds, at or above it milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Decides insert vs. skip for remote records and converts them for storage.
pub struct RecordReconciler {
    store: Arc<dyn LocalStore>,
    policy: ExistencePolicy,
}

impl RecordReconciler {
    pub fn new(store: Arc<dyn LocalStore>, policy: ExistencePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> ExistencePolicy {
        self.policy
    }

    /// Whether a local record already carries this record's identity.
    ///
    /// Only the highest-priority identity field present with a non-empty
    /// value is consulted. Records without one never exist locally.
    pub async fn exists(&self, table: &TableName, record: &RemoteRecord) -> Result<bool> {
        let Some((field, value)) = record.identity() else {
            return Ok(false);
        };
        let value = FieldValue::from_json(value.clone());

        match self.store.find_where(table, field, &value).await {
            Ok(found) => Ok(!found.is_empty()),
            Err(e) => match self.policy {
                ExistencePolicy::FailOpen => {
                    warn!(
                        "{}: existence check on {} failed, treating as new: {}",
                        table, field, e
                    );
                    Ok(false)
                }
                ExistencePolicy::FailClosed => Err(e),
            },
        }
    }

    /// Convert a remote record into the local shape.
    pub fn convert(record: RemoteRecord) -> LocalRecord {
        record
            .into_inner()
            .into_iter()
            .map(|(name, value)| {
                let converted = convert_field(&name, value);
                (name, converted)
            })
            .collect()
    }

    /// Convert a local record back into the remote shape.
    pub fn to_remote(record: &LocalRecord) -> RemoteRecord {
        let mut remote = RemoteRecord::default();
        for (name, value) in record.fields() {
            let value = match value {
                FieldValue::Timestamp(ms) => format_timestamp(*ms),
                FieldValue::Integer(ms) if is_timestamp_field(name) => format_timestamp(*ms),
                FieldValue::Json(json) if name.ends_with("_json") => {
                    Value::String(json.to_string())
                }
                other => other.to_json(),
            };
            remote.insert(name.clone(), value);
        }
        remote
    }
}

fn is_timestamp_field(name: &str) -> bool {
    name == "created_at" || name == "updated_at" || name.ends_with("_at")
}

fn convert_field(name: &str, value: Value) -> FieldValue {
    if name == "id" {
        return FieldValue::from_json(value);
    }
    if is_timestamp_field(name) {
        return match parse_timestamp(&value) {
            Some(ms) => FieldValue::Timestamp(ms),
            None => {
                if !value.is_null() {
                    debug!("Keeping unparseable timestamp {} as-is", name);
                }
                FieldValue::from_json(value)
            }
        };
    }
    if name.ends_with("_json") {
        return match value {
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(parsed) => FieldValue::Json(parsed),
                Err(_) => {
                    debug!("Keeping unparseable JSON field {} as text", name);
                    FieldValue::Text(raw)
                }
            },
            other => FieldValue::from_json(other),
        };
    }
    FieldValue::from_json(value)
}

/// Milliseconds since the Unix epoch for a date/time value.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][+HH[:MM]]`, bare dates
/// (midnight UTC) and epoch numbers, as JSON numbers or numeric strings.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_millis),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn epoch_to_millis(epoch: f64) -> Option<i64> {
    if !epoch.is_finite() {
        return None;
    }
    let ms = if epoch.abs() < EPOCH_MILLIS_THRESHOLD {
        epoch * 1000.0
    } else {
        epoch
    };
    if ms.abs() > i64::MAX as f64 {
        return None;
    }
    Some(ms.round() as i64)
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(epoch) = s.parse::<f64>() {
        return epoch_to_millis(epoch);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.timestamp_millis());
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn format_timestamp(ms: i64) -> Value {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => Value::from(ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tethersync_store::MemoryStore;

    fn remote(value: Value) -> RemoteRecord {
        RemoteRecord::from_value(value).unwrap()
    }

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = 1_704_067_200_000; // 2024-01-01T00:00:00Z
        assert_eq!(parse_timestamp(&json!("2024-01-01T00:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01T01:00:00+01:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01 00:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01 00:00:00.250")), Some(expected + 250));
        assert_eq!(parse_timestamp(&json!("2024-01-01 00:00:00+00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01")), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_704_067_200)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_704_067_200_000i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!("1704067200")), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[test]
    fn test_convert_rules() {
        let local = RecordReconciler::convert(remote(json!({
            "id": "2024-01-01",
            "created_at": "2024-01-01T00:00:00Z",
            "last_seen_at": 1_704_067_200,
            "deleted_at": null,
            "reviewed_at": "someday",
            "settings_json": "{\"theme\":\"dark\"}",
            "broken_json": "{oops",
            "content_encrypted": "Zm9v",
            "tags": ["a", "b"],
            "score": 7
        })));

        assert_eq!(local.get("id"), Some(&FieldValue::Text("2024-01-01".into())));
        assert_eq!(local.get("created_at"), Some(&FieldValue::Timestamp(1_704_067_200_000)));
        assert_eq!(
            local.get("last_seen_at"),
            Some(&FieldValue::Timestamp(1_704_067_200_000))
        );
        assert_eq!(local.get("deleted_at"), Some(&FieldValue::Null));
        assert_eq!(local.get("reviewed_at"), Some(&FieldValue::Text("someday".into())));
        assert_eq!(
            local.get("settings_json"),
            Some(&FieldValue::Json(json!({"theme": "dark"})))
        );
        assert_eq!(local.get("broken_json"), Some(&FieldValue::Text("{oops".into())));
        assert_eq!(local.get("content_encrypted"), Some(&FieldValue::Text("Zm9v".into())));
        assert_eq!(local.get("tags"), Some(&FieldValue::Json(json!(["a", "b"]))));
        assert_eq!(local.get("score"), Some(&FieldValue::Integer(7)));
    }

    #[test]
    fn test_to_remote_reverses_normalization() {
        let local = RecordReconciler::convert(remote(json!({
            "id": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "settings_json": "{\"theme\":\"dark\"}",
            "body": "hello",
        })));
        let back = RecordReconciler::to_remote(&local);

        assert_eq!(back.get("id"), Some(&json!(1)));
        assert_eq!(back.get("created_at"), Some(&json!("2024-01-01T00:00:00.000Z")));
        assert_eq!(back.get("settings_json"), Some(&json!("{\"theme\":\"dark\"}")));
        assert_eq!(back.get("body"), Some(&json!("hello")));

        // Timestamps read back from the store are plain integers.
        let mut stored = LocalRecord::new();
        stored.insert("updated_at", FieldValue::Integer(1_704_067_200_000));
        let back = RecordReconciler::to_remote(&stored);
        assert_eq!(back.get("updated_at"), Some(&json!("2024-01-01T00:00:00.000Z")));
    }

    #[tokio::test]
    async fn test_exists_uses_highest_priority_identity() {
        let store = Arc::new(MemoryStore::new());
        let mut existing = LocalRecord::new();
        existing.insert("id", FieldValue::Integer(1));
        existing.insert("job_id", FieldValue::from("job-7"));
        store.create(&table("ai_jobs"), existing).await.unwrap();

        let reconciler = RecordReconciler::new(store, ExistencePolicy::FailOpen);
        let ai_jobs = table("ai_jobs");

        let same_job_other_id = remote(json!({"id": 2, "job_id": "job-7"}));
        assert!(!reconciler.exists(&ai_jobs, &same_job_other_id).await.unwrap());

        let same_id = remote(json!({"id": 1, "job_id": "job-8"}));
        assert!(reconciler.exists(&ai_jobs, &same_id).await.unwrap());

        let job_only = remote(json!({"id": "", "job_id": "job-7"}));
        assert!(reconciler.exists(&ai_jobs, &job_only).await.unwrap());

        let anonymous = remote(json!({"body": "x"}));
        assert!(!reconciler.exists(&ai_jobs, &anonymous).await.unwrap());
    }

    #[tokio::test]
    async fn test_existence_policy_on_lookup_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_lookups(true);
        let record = remote(json!({"id": 1}));

        let open = RecordReconciler::new(store.clone(), ExistencePolicy::FailOpen);
        assert!(!open.exists(&table("messages"), &record).await.unwrap());

        let closed = RecordReconciler::new(store, ExistencePolicy::FailClosed);
        assert!(closed.exists(&table("messages"), &record).await.is_err());
    }

    proptest! {
        #[test]
        fn prop_epoch_seconds_and_millis_agree(secs in 0i64..4_000_000_000) {
            let from_secs = parse_timestamp(&json!(secs));
            let from_millis = parse_timestamp(&json!(secs * 1000));
            prop_assert_eq!(from_secs, Some(secs * 1000));
            if secs * 1000 >= 100_000_000_000 {
                prop_assert_eq!(from_millis, Some(secs * 1000));
            }
        }

        #[test]
        fn prop_rfc3339_round_trips(ms in 0i64..4_000_000_000_000) {
            let formatted = format_timestamp(ms);
            prop_assert_eq!(parse_timestamp(&formatted), Some(ms));
        }
    }
}
