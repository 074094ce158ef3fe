//! Error types for backend calls.

use thiserror::Error;

/// Errors that can occur while talking to the chat backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// HTTP client configuration error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The backend reported a failure inside a stream.
    #[error("backend stream error: {0}")]
    Remote(String),

    /// Backend is not reachable (used by in-process backends).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::HttpRequest(_) | Self::Unavailable(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the backend said the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Convenience result alias for backend calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = ApiError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = ApiError::Status {
            status: 404,
            body: "missing".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
        assert!(!ApiError::Remote("boom".to_string()).is_retryable());
    }
}
