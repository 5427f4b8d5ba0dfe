//! PostgREST-style HTTP backend.
//!
//! Talks to a hosted Postgres exposed through PostgREST conventions:
//! `/rest/v1/{table}` for rows, `Prefer: count=exact` for counts and the
//! OpenAPI root document for the table catalog.

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::backend::{OrderBy, RemoteBackend};
use tethersync_common::{Error, RemoteRecord, Result, TableName};

/// Path of the REST API below the project URL.
const REST_PREFIX: &str = "rest/v1";

/// Connection settings for [`RestBackend`].
#[derive(Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub url: String,
    /// API key sent as `apikey` and as bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Remote backend speaking PostgREST over HTTP.
pub struct RestBackend {
    http: Client,
    base: Url,
    api_key: String,
}

impl RestBackend {
    /// Create a new backend client.
    ///
    /// # Errors
    /// - URL cannot be parsed or is not http(s)
    /// - API key is empty
    /// - HTTP client cannot be built
    pub fn new(config: RestConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("Invalid remote URL '{}': {}", config.url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Remote URL must be http or https: {}",
                config.url
            )));
        }
        if config.api_key.is_empty() {
            return Err(Error::Config("Remote API key is empty".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("Tethersync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            api_key: config.api_key,
        })
    }

    fn endpoint(&self, table: Option<&TableName>) -> Result<Url> {
        let path = match table {
            Some(table) => format!("{}/{}", REST_PREFIX, table),
            None => format!("{}/", REST_PREFIX),
        };
        self.base
            .join(&path)
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", what, e)))?;
        check_status(response, what).await
    }

    async fn fetch_records(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Vec<RemoteRecord>> {
        let response = self.send(request, what).await?;
        response
            .json::<Vec<RemoteRecord>>()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse {} response: {}", what, e)))
    }
}

/// Map a non-success HTTP status to the error taxonomy.
///
/// Gateway failures mean the backend itself is unreachable, so they are
/// reported as network errors.
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(Error::NotFound(format!("{}: {}", what, body))),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Err(Error::Network(format!("Failed to {}: {} {}", what, status, body)))
        }
        _ => Err(Error::Remote(format!("Failed to {}: {} {}", what, status, body))),
    }
}

/// Parse the total from a `Content-Range` header such as `0-24/120` or `*/0`.
pub fn parse_content_range(value: &str) -> Result<usize> {
    let total = value
        .rsplit_once('/')
        .map(|(_, total)| total.trim())
        .ok_or_else(|| Error::Remote(format!("Malformed Content-Range: {}", value)))?;
    total
        .parse()
        .map_err(|_| Error::Remote(format!("Content-Range has no exact total: {}", value)))
}

/// Render a filter value for a `field=eq.value` query parameter.
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Table names from the OpenAPI root document.
///
/// Prefers `definitions`; falls back to `paths`, skipping the root and RPC
/// endpoints.
pub fn tables_from_openapi(doc: &Value) -> Vec<String> {
    let mut tables: Vec<String> = match doc.get("definitions").and_then(Value::as_object) {
        Some(definitions) if !definitions.is_empty() => definitions.keys().cloned().collect(),
        _ => doc
            .get("paths")
            .and_then(Value::as_object)
            .map(|paths| {
                paths
                    .keys()
                    .filter_map(|p| p.strip_prefix('/'))
                    .filter(|p| !p.is_empty() && !p.starts_with("rpc/"))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
    };
    tables.sort();
    tables.dedup();
    tables
}

#[async_trait]
impl RemoteBackend for RestBackend {
    fn name(&self) -> &str {
        "rest"
    }

    fn is_secure(&self) -> bool {
        self.base.scheme() == "https"
    }

    async fn ping(&self) -> Result<()> {
        let url = self.endpoint(None)?;
        self.send(self.request(Method::HEAD, url), "reach remote backend")
            .await
            .map(|_| ())
    }

    async fn count(&self, table: &TableName) -> Result<usize> {
        let url = self.endpoint(Some(table))?;
        let request = self
            .request(Method::HEAD, url)
            .header("Prefer", "count=exact")
            .query(&[("select", "*"), ("limit", "1")]);
        let response = self.send(request, &format!("count {}", table)).await?;

        let range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Remote(format!("No Content-Range in count of {}", table)))?;
        let total = parse_content_range(range)?;
        debug!("Remote count for {}: {}", table, total);
        Ok(total)
    }

    async fn select_range(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>> {
        let url = self.endpoint(Some(table))?;
        let mut request = self.request(Method::GET, url).query(&[
            ("select", "*".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(order) = order_by {
            request = request.query(&[("order", order.to_string())]);
        }
        self.fetch_records(request, &format!("read {} at offset {}", table, offset))
            .await
    }

    async fn select_where(
        &self,
        table: &TableName,
        field: &str,
        value: &Value,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>> {
        tethersync_common::types::validate_identifier(field)?;
        let url = self.endpoint(Some(table))?;
        let mut request = self.request(Method::GET, url).query(&[
            ("select", "*".to_string()),
            (field, format!("eq.{}", filter_value(value))),
        ]);
        if let Some(order) = order_by {
            request = request.query(&[("order", order.to_string())]);
        }
        self.fetch_records(request, &format!("look up {}.{}", table, field))
            .await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let url = self.endpoint(None)?;
        let request = self
            .request(Method::GET, url)
            .header(header::ACCEPT, "application/openapi+json");
        let response = self.send(request, "read table catalog").await?;
        let doc: Value = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse table catalog: {}", e)))?;
        Ok(tables_from_openapi(&doc))
    }

    async fn insert(&self, table: &TableName, records: Vec<RemoteRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(Some(table))?;
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(&records);
        self.send(request, &format!("insert into {}", table))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-24/120").unwrap(), 120);
        assert_eq!(parse_content_range("*/0").unwrap(), 0);
        assert!(parse_content_range("0-24/*").is_err());
        assert!(parse_content_range("garbage").is_err());
    }

    #[test]
    fn test_tables_from_openapi_definitions() {
        let doc = json!({
            "definitions": {"messages": {}, "ai_jobs": {}},
            "paths": {"/": {}, "/messages": {}, "/ai_jobs": {}, "/rpc/match": {}}
        });
        assert_eq!(tables_from_openapi(&doc), vec!["ai_jobs", "messages"]);
    }

    #[test]
    fn test_tables_from_openapi_paths_fallback() {
        let doc = json!({
            "paths": {"/": {}, "/embeddings": {}, "/rpc/match_vectors": {}}
        });
        assert_eq!(tables_from_openapi(&doc), vec!["embeddings"]);
    }

    #[test]
    fn test_filter_value() {
        assert_eq!(filter_value(&json!("abc")), "abc");
        assert_eq!(filter_value(&json!(42)), "42");
        assert_eq!(filter_value(&Value::Null), "null");
    }

    #[test]
    fn test_config_validation() {
        assert!(RestBackend::new(RestConfig::new("not a url", "key")).is_err());
        assert!(RestBackend::new(RestConfig::new("ftp://example.com", "key")).is_err());
        assert!(RestBackend::new(RestConfig::new("https://example.com", "")).is_err());
    }

    #[test]
    fn test_endpoints_and_security() {
        let backend = RestBackend::new(RestConfig::new("https://example.com/base", "key")).unwrap();
        assert!(backend.is_secure());
        let table = TableName::new("messages").unwrap();
        assert_eq!(
            backend.endpoint(Some(&table)).unwrap().as_str(),
            "https://example.com/base/rest/v1/messages"
        );

        let plain = RestBackend::new(RestConfig::new("http://localhost:54321", "key")).unwrap();
        assert!(!plain.is_secure());
        assert_eq!(
            plain.endpoint(None).unwrap().as_str(),
            "http://localhost:54321/rest/v1/"
        );
    }
}
