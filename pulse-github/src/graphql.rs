//! GraphQL wire types and the query executor seam
//!
//! Everything the pipeline knows about a response is decided here: whether
//! the round trip failed, whether GitHub reported in-band errors, and where
//! the data is. Callers only ever see a [`QueryResponse`] or a typed
//! [`Error`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;

use crate::{Error, Result};

/// Executes one GraphQL round trip
///
/// Implementations send exactly one request per call and never retry;
/// see [`crate::RetryingExecutor`] for rate-limit backoff.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str, variables: &Value) -> Result<QueryResponse>;
}

#[async_trait]
impl<E: QueryExecutor + ?Sized> QueryExecutor for Arc<E> {
    async fn execute(&self, query: &str, variables: &Value) -> Result<QueryResponse> {
        (**self).execute(query, variables).await
    }
}

/// GraphQL query response wrapper, as sent by the server
#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<ApiError>,
}

/// In-band GraphQL error
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    pub message: String,
    /// GitHub's error class, e.g. `NOT_FOUND`, `RATE_LIMITED`, `FORBIDDEN`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: Vec<Value>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            path: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind.as_deref() == Some("RATE_LIMITED")
            || self.message.to_lowercase().contains("rate limit")
    }

    pub fn is_not_found(&self) -> bool {
        self.kind.as_deref() == Some("NOT_FOUND")
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{} ({})", self.message, kind),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of a round trip that produced usable data
///
/// `errors` is non-empty for a partial success: GitHub resolved part of the
/// query and nulled the rest.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub data: Option<Value>,
    pub errors: Vec<ApiError>,
}

impl QueryResponse {
    pub fn new(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Classify a decoded response body
    ///
    /// Rate-limit errors always fail the request; other errors only fail it
    /// when no data came back with them. A body with no data and no errors
    /// is malformed.
    pub fn classify(
        data: Option<Value>,
        errors: Vec<ApiError>,
        reset_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if let Some(limited) = errors.iter().find(|e| e.is_rate_limited()) {
            return Err(Error::RateLimited {
                reset_at,
                message: limited.message.clone(),
            });
        }

        let data = data.filter(|d| !d.is_null());
        if data.is_none() {
            if errors.is_empty() {
                return Err(Error::Protocol("Response carried neither data nor errors".to_string()));
            }
            return Err(Error::Application(errors));
        }

        Ok(Self { data, errors })
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Relay page descriptor
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// Relay connection with nullable nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Connection<T> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_info: PageInfo,
    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    pub nodes: Vec<Option<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            page_info: PageInfo::default(),
            nodes: Vec::new(),
        }
    }
}

/// Treat an explicit `null` like a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Walk object keys, treating `null` as absent
pub(crate) fn lookup<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(data, |value, key| value.get(key))
        .filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(value: Value) -> Vec<ApiError> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_response_with_errors() {
        let body = r#"{
            "data": {"repository": null},
            "errors": [{"type": "NOT_FOUND", "path": ["repository"], "message": "Could not resolve to a Repository with the name 'x/y'."}]
        }"#;
        let parsed: GraphQlResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].is_not_found());
        assert_eq!(parsed.errors[0].path, vec![json!("repository")]);
    }

    #[test]
    fn test_decode_response_null_errors() {
        let parsed: GraphQlResponse =
            serde_json::from_str(r#"{"data": {"a": 1}, "errors": null}"#).unwrap();
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_classify_partial_success() {
        let response = QueryResponse::classify(
            Some(json!({"repository": {"pullRequest": null}})),
            errors(json!([{"type": "NOT_FOUND", "message": "Could not resolve to a PullRequest"}])),
            None,
        )
        .unwrap();
        assert!(response.is_partial());
        assert!(response.data.is_some());
    }

    #[test]
    fn test_classify_errors_without_data() {
        let err = QueryResponse::classify(
            None,
            errors(json!([{"message": "Field 'x' doesn't exist"}])),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Application(ref e) if e.len() == 1));

        // explicit null data is the same as missing data
        let err = QueryResponse::classify(
            Some(Value::Null),
            errors(json!([{"message": "boom"}])),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Application(_)));
    }

    #[test]
    fn test_classify_rate_limited_even_with_data() {
        let err = QueryResponse::classify(
            Some(json!({})),
            errors(json!([{"type": "RATE_LIMITED", "message": "API rate limit exceeded for user"}])),
            None,
        )
        .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_classify_no_data_no_errors() {
        let err = QueryResponse::classify(None, Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = QueryResponse::classify(Some(Value::Null), Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_connection_tolerates_nulls() {
        let conn: Connection<u64> = serde_json::from_value(json!({
            "pageInfo": null,
            "nodes": [1, null, 3]
        }))
        .unwrap();
        assert_eq!(conn.page_info, PageInfo::default());
        assert_eq!(conn.nodes, vec![Some(1), None, Some(3)]);

        let conn: Connection<u64> = serde_json::from_value(json!({"nodes": null})).unwrap();
        assert!(conn.nodes.is_empty());
    }

    #[test]
    fn test_lookup_treats_null_as_absent() {
        let data = json!({"repository": {"issues": null, "name": "x"}});
        assert!(lookup(&data, &["repository", "issues"]).is_none());
        assert!(lookup(&data, &["repository", "missing"]).is_none());
        assert_eq!(lookup(&data, &["repository", "name"]), Some(&json!("x")));
    }
}
