//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub user_query: Option<String>,
}

impl GenerateRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            user_query: Some(query.into()),
        }
    }

    /// Parse a raw request body, returning the query if one was supplied.
    ///
    /// Invalid JSON, a missing field and an empty string all count as absent.
    pub fn query_from_body(body: &[u8]) -> Option<String> {
        let request: GenerateRequest = serde_json::from_slice(body).ok()?;
        request.user_query.filter(|q| !q.is_empty())
    }
}

/// Error body for request-level failures (`{"error": "..."}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub upstream_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_from_body() {
        assert_eq!(
            GenerateRequest::query_from_body(br#"{"userQuery":"add tests"}"#).as_deref(),
            Some("add tests")
        );
        assert_eq!(GenerateRequest::query_from_body(br#"{"userQuery":""}"#), None);
        assert_eq!(GenerateRequest::query_from_body(br#"{}"#), None);
        assert_eq!(GenerateRequest::query_from_body(br#"{"userQuery":7}"#), None);
        assert_eq!(GenerateRequest::query_from_body(b"not json"), None);
        assert_eq!(GenerateRequest::query_from_body(b""), None);
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let body = serde_json::to_string(&GenerateRequest::new("q")).unwrap();
        assert_eq!(body, r#"{"userQuery":"q"}"#);
    }
}
