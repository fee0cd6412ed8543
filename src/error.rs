use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

/// Error type returned by this crate.
///
/// Failures are classified once, at the transport boundary. Retry decisions
/// are made with [`ApiError::is_retryable`] and never by inspecting messages.
///
/// The type is `Clone` so a single failed read can be handed to every caller
/// that was waiting on it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    /// No response was received (connect, timeout, body read) from `reqwest`.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),
    /// Non-success HTTP status code.
    ///
    /// `message` is the `error` field of the response body, or `HTTP <status>`
    /// when the body is absent or not the expected envelope.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        /// Parsed response body, when it was JSON.
        body: Option<JsonValue>,
    },
    /// Request body could not be serialized to JSON.
    #[error("encode error: {0}")]
    Encode(String),
    /// Response body (or the caller's requested type) could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid client configuration or base URL resolution failure.
    #[error("configuration error: {0}")]
    Config(String),
    /// The connectivity probe did not complete within its bound.
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// The caller's cancellation token fired before the call settled.
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub(crate) fn network(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }

    /// Returns the HTTP status code, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether another attempt may succeed: transport failures, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Encode(_)
            | Self::Decode(_)
            | Self::Config(_)
            | Self::Timeout(_)
            | Self::Cancelled => false,
        }
    }

    /// Whether the server rejected the session credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Human-readable message suitable for UI feedback.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::ApiError;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            message: format!("HTTP {status}"),
            body: None,
        }
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        for status in [500, 502, 503, 504, 599, 429] {
            assert!(http(status).is_retryable(), "status {status}");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!http(status).is_retryable(), "status {status}");
        }
        assert!(!ApiError::Decode("bad json".to_owned()).is_retryable());
        assert!(!ApiError::Encode("key must be a string".to_owned()).is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn http_error_displays_bare_message() {
        let err = ApiError::Http {
            status: 404,
            message: "not found".to_owned(),
            body: None,
        };
        assert_eq!(err.message(), "not found");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_unauthorized());
        assert!(http(401).is_unauthorized());
    }
}
