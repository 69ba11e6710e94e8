//! Error taxonomy for upstream generator calls.

use std::fmt;

/// Broad category of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// HTTP 429 from the provider.
    RateLimited,
    /// 4xx other than 429 (bad key, bad request, unknown model).
    ClientError,
    /// 5xx from the provider.
    ServerError,
    /// Connection, DNS, TLS or read failure.
    Network,
    /// The provider answered with something we could not decode.
    Parse,
    /// The provider reported an error or refused the prompt inside a 2xx stream.
    Upstream,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmErrorKind::RateLimited => "rate limited",
            LlmErrorKind::ClientError => "client error",
            LlmErrorKind::ServerError => "server error",
            LlmErrorKind::Network => "network error",
            LlmErrorKind::Parse => "parse error",
            LlmErrorKind::Upstream => "upstream error",
        };
        f.write_str(name)
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        500..=599 => LlmErrorKind::ServerError,
        _ => LlmErrorKind::Upstream,
    }
}

/// Failure talking to the upstream generator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// HTTP status, when the failure came with one.
    pub status: Option<u16>,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: String, status: Option<u16>) -> Self {
        Self {
            kind,
            message,
            status,
        }
    }

    pub fn from_status(status: u16, message: String) -> Self {
        Self::new(classify_http_status(status), message, Some(status))
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::Network, message, None)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::Parse, message, None)
    }

    pub fn upstream(message: String) -> Self {
        Self::new(LlmErrorKind::Upstream, message, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(403), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(302), LlmErrorKind::Upstream);
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = LlmError::from_status(400, "API key not valid".to_string());
        assert_eq!(err.to_string(), "client error: API key not valid");
        assert_eq!(err.status, Some(400));
    }
}
