//! Error types for the RAG service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an LLM/embedding provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Bad or missing credentials (401/403)
    Auth,
    /// The provider rejected the request payload (other 4xx)
    BadRequest,
    /// Provider-side rate limit or quota (408/429)
    QuotaExceeded,
    /// 5xx, timeout, or retries exhausted
    Unavailable,
    /// Anything else
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::BadRequest => "bad_request",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a vector store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreErrorKind {
    /// 5xx/timeout after retries, or circuit breaker open
    Unavailable,
    /// Collection exists in a conflicting state
    Conflict,
    /// Unknown collection
    NotFound,
    /// Existing collection dimension disagrees with the provider's
    BadDimension,
}

impl VectorStoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::BadDimension => "bad_dimension",
        }
    }
}

impl std::fmt::Display for VectorStoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a progress tracker failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressErrorKind {
    /// Upload id was never created
    Unknown,
    /// Upload id existed but was evicted after its TTL
    Evicted,
    /// Subscriber queue overflowed; the subscriber was dropped
    Slow,
}

impl ProgressErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Evicted => "evicted",
            Self::Slow => "slow",
        }
    }
}

impl std::fmt::Display for ProgressErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RAG service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider (embeddings/chat) error
    #[error("Provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    /// Vector store error
    #[error("Vector store error ({kind}): {message}")]
    VectorStore {
        kind: VectorStoreErrorKind,
        message: String,
    },

    /// Progress tracker error
    #[error("Progress error ({kind}): {message}")]
    Progress {
        kind: ProgressErrorKind,
        message: String,
    },

    /// QA service is not initialized and auto-initialization failed
    #[error("Service unavailable: {detail}")]
    ServiceUnavailable { detail: String, suggestion: String },

    /// Inbound request rejected by the rate limiter
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Work was cancelled by shutdown or client disconnect
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
        }
    }

    pub fn vector_store(kind: VectorStoreErrorKind, message: impl Into<String>) -> Self {
        Self::VectorStore {
            kind,
            message: message.into(),
        }
    }

    pub fn progress(kind: ProgressErrorKind, message: impl Into<String>) -> Self {
        Self::Progress {
            kind,
            message: message.into(),
        }
    }

    pub fn service_unavailable(detail: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            detail: detail.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether another attempt may succeed. Used by the retry helpers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { kind, .. } => matches!(
                kind,
                ProviderErrorKind::QuotaExceeded | ProviderErrorKind::Unavailable
            ),
            Self::VectorStore { kind, .. } => matches!(kind, VectorStoreErrorKind::Unavailable),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // 503 with an actionable suggestion has its own body shape
        if let Error::ServiceUnavailable { detail, suggestion } = &self {
            let body = Json(json!({
                "detail": detail,
                "suggestion": suggestion,
            }));
            return (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
        }

        let (status, error_type, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::Provider { kind, message } => {
                let status = match kind {
                    ProviderErrorKind::QuotaExceeded | ProviderErrorKind::Unavailable => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, "provider_error", format!("{}: {}", kind.as_str(), message))
            }
            Error::VectorStore { kind, message } => {
                let status = match kind {
                    VectorStoreErrorKind::NotFound => StatusCode::NOT_FOUND,
                    VectorStoreErrorKind::Conflict => StatusCode::CONFLICT,
                    VectorStoreErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                    VectorStoreErrorKind::BadDimension => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "vector_store_error", format!("{}: {}", kind.as_str(), message))
            }
            Error::Progress { kind, message } => {
                let status = match kind {
                    ProgressErrorKind::Unknown | ProgressErrorKind::Evicted => StatusCode::NOT_FOUND,
                    ProgressErrorKind::Slow => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "progress_error", message.clone())
            }
            Error::ServiceUnavailable { .. } => unreachable!(),
            Error::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", msg.clone()),
            Error::Cancelled(msg) => (StatusCode::SERVICE_UNAVAILABLE, "cancelled", msg.clone()),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
