//! Record shapes exchanged between the remote backend, the sync engine and
//! the local store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Identity candidate fields, highest priority first.
pub const IDENTITY_CANDIDATES: [&str; 4] = ["id", "job_id", "content_id", "vector_id"];

/// A typed field value as persisted in the local store.
///
/// Serializes to plain JSON. `Timestamp` is written as an integer count of
/// milliseconds since the Unix epoch, so it reads back as `Integer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Structured value (object or array).
    Json(Value),
}

impl FieldValue {
    /// Map a JSON value onto the closest typed variant.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::Text(s),
            other => FieldValue::Json(other),
        }
    }

    /// Convert back into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Integer(i) | FieldValue::Timestamp(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Json(v) => v.clone(),
        }
    }

    /// Null or an empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; timestamps count as integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) | FieldValue::Timestamp(i) => Some(*i),
            _ => None,
        }
    }

    /// Equality as the local store sees it.
    ///
    /// A timestamp equals the integer with the same millisecond value, since
    /// both are stored as the same JSON number.
    pub fn store_eq(&self, other: &FieldValue) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_json() == other.to_json(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A record as returned by the remote backend: an untyped field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord(Map<String, Value>);

impl RemoteRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(crate::Error::Serialization(format!(
                "Expected a JSON object for a record, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The highest-priority identity candidate present with a non-empty value.
    pub fn identity(&self) -> Option<(&'static str, &Value)> {
        IDENTITY_CANDIDATES.iter().find_map(|field| {
            let value = self.0.get(*field)?;
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            };
            (!empty).then_some((*field, value))
        })
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for RemoteRecord {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// A record in the local store's shape.
///
/// Field order is stable (sorted by name) so persisted JSON is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRecord(BTreeMap<String, FieldValue>);

impl LocalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The highest-priority identity candidate present with a non-empty value.
    pub fn identity(&self) -> Option<(&'static str, &FieldValue)> {
        IDENTITY_CANDIDATES.iter().find_map(|field| {
            let value = self.0.get(*field)?;
            (!value.is_empty()).then_some((*field, value))
        })
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Rebuild from a persisted JSON object.
    pub fn from_json(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            )),
            other => Err(crate::Error::Serialization(format!(
                "Expected a JSON object for a local record, got {}",
                other
            ))),
        }
    }
}

impl FromIterator<(String, FieldValue)> for LocalRecord {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_identity_priority() {
        let record = RemoteRecord::from_value(json!({
            "job_id": "job-1",
            "id": "abc",
        }))
        .unwrap();
        let (field, value) = record.identity().unwrap();
        assert_eq!(field, "id");
        assert_eq!(value, &json!("abc"));
    }

    #[test]
    fn test_remote_identity_skips_empty() {
        let record = RemoteRecord::from_value(json!({
            "id": "",
            "content_id": null,
            "vector_id": 7,
        }))
        .unwrap();
        assert_eq!(record.identity(), Some(("vector_id", &json!(7))));
    }

    #[test]
    fn test_remote_identity_absent() {
        let record = RemoteRecord::from_value(json!({"title": "x"})).unwrap();
        assert!(record.identity().is_none());
    }

    #[test]
    fn test_remote_from_non_object_fails() {
        assert!(RemoteRecord::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_local_json_roundtrip_keeps_values() {
        let mut record = LocalRecord::new();
        record.insert("id", "r1".into());
        record.insert("created_at", FieldValue::Timestamp(1_700_000_000_000));
        record.insert("meta_json", FieldValue::Json(json!({"k": [1, 2]})));
        record.insert("score", FieldValue::Float(0.5));

        let restored = LocalRecord::from_json(record.to_json()).unwrap();
        assert_eq!(restored.get("id"), Some(&FieldValue::Text("r1".into())));
        assert_eq!(
            restored.get("created_at"),
            Some(&FieldValue::Integer(1_700_000_000_000))
        );
        assert_eq!(
            restored.get("meta_json"),
            Some(&FieldValue::Json(json!({"k": [1, 2]})))
        );
    }

    #[test]
    fn test_store_eq_timestamp_vs_integer() {
        assert!(FieldValue::Timestamp(5).store_eq(&FieldValue::Integer(5)));
        assert!(FieldValue::from("a").store_eq(&FieldValue::from("a")));
        assert!(!FieldValue::from("5").store_eq(&FieldValue::Integer(5)));
    }
}
