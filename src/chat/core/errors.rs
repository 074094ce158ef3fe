//! Error types for the chat subsystem.

use thiserror::Error;

use crate::api::error::ApiError;
use crate::chat::core::ids::ConversationId;

/// Chat subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend call failed.
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
    /// Streamed notifications violated the progress*/result contract.
    #[error("stream protocol violation: {0}")]
    Stream(String),
    /// The stream closed before its result notification.
    #[error("stream ended without a result notification")]
    StreamEndedWithoutResult,
    /// A new conversation got a result without a durable id.
    #[error("backend did not assign a conversation id")]
    MissingConversationId,
    /// The tab shut down while a reply was streaming.
    #[error("tab shut down before the reply completed")]
    ShutDown,
    /// Conversation is unknown locally and remotely.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// Cached record could not be decoded.
    #[error("invalid cache record: {0}")]
    InvalidCacheRecord(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether the failure came from talking to the backend.
    ///
    /// Transport failures roll back optimistic state and are shown to the user.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Api(_)
                | Self::Stream(_)
                | Self::StreamEndedWithoutResult
                | Self::MissingConversationId
        )
    }

    /// Whether sending the same request again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_are_transport() {
        let err = ChatError::from(ApiError::Unavailable("down".to_string()));
        assert!(err.is_transport());
        assert!(err.is_retryable());
        assert!(ChatError::StreamEndedWithoutResult.is_transport());
        assert!(!ChatError::StreamEndedWithoutResult.is_retryable());
    }

    #[test]
    fn local_failures_are_not_transport() {
        let err = ChatError::InvalidCacheRecord("bad timestamp".to_string());
        assert!(!err.is_transport());
        assert!(!err.is_retryable());
    }
}
