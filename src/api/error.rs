//! API error responses.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::llm::LlmError;

/// Failures the relay reports before any stream bytes are written.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("userQuery is required")]
    MissingQuery,
    #[error("API_KEY is not configured on the server.")]
    MissingCredential,
    #[error("Too many requests, please try again later.")]
    RateLimited { retry_after: Duration },
    #[error("An error occurred on the server: {}", .0.message)]
    Upstream(LlmError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingQuery => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::MissingCredential | ApiError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        match self {
            // Upstream failures use the event shape so a client can show them as-is.
            ApiError::Upstream(_) => {
                (status, Json(json!({ "type": "error", "message": message }))).into_response()
            }
            ApiError::RateLimited { retry_after } => {
                let mut response = (status, Json(json!({ "error": message }))).into_response();
                let secs = retry_after.as_secs().max(1).to_string();
                if let Ok(value) = HeaderValue::from_str(&secs) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            ApiError::MissingQuery | ApiError::MissingCredential => {
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::MissingQuery.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::MissingCredential.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_upstream_message_uses_provider_text() {
        let err = ApiError::Upstream(LlmError::from_status(400, "API key not valid.".to_string()));
        assert_eq!(
            err.to_string(),
            "An error occurred on the server: API key not valid."
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_millis(200),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
