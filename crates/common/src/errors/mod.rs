//! Error types for TrendLens services
//!
//! Provides the failure taxonomy of a query:
//! - Protocol errors rejected before any retrieval work
//! - Retrieval failures (embedding or index unavailable)
//! - Synthesis failures (language model error, timeout, empty response)
//! - HTTP status code mapping and structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors (1xxx)
    ValidationError,
    ProtocolError,

    // Rate limiting (6xxx)
    RateLimited,

    // Corpus errors (7xxx)
    CorpusError,

    // External service errors (8xxx)
    RetrievalError,
    RetrievalTimeout,
    EmbeddingError,
    SynthesisError,
    SynthesisTimeout,
    CacheError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::ProtocolError => 1002,

            ErrorCode::RateLimited => 6001,

            ErrorCode::CorpusError => 7001,

            ErrorCode::RetrievalError => 8001,
            ErrorCode::RetrievalTimeout => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::SynthesisError => 8004,
            ErrorCode::SynthesisTimeout => 8005,
            ErrorCode::CacheError => 8006,
            ErrorCode::UpstreamError => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Request errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Malformed query request: {message}")]
    Protocol { message: String },

    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Corpus errors
    #[error("Corpus error: {message}")]
    Corpus { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    // Query pipeline errors
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Retrieval timed out after {timeout_ms}ms")]
    RetrievalTimeout { timeout_ms: u64 },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Answer synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Answer synthesis timed out after {timeout_ms}ms")]
    SynthesisTimeout { timeout_ms: u64 },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Protocol { .. } => ErrorCode::ProtocolError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Corpus { .. } | AppError::Database(_) => ErrorCode::CorpusError,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::RetrievalTimeout { .. } => ErrorCode::RetrievalTimeout,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Synthesis { .. } => ErrorCode::SynthesisError,
            AppError::SynthesisTimeout { .. } => ErrorCode::SynthesisTimeout,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::Protocol { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Retrieval { .. } |
            AppError::EmbeddingError { .. } |
            AppError::Synthesis { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Corpus { .. } |
            AppError::Database(_) |
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::RetrievalTimeout { .. } |
            AppError::SynthesisTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Fold any failure raised while retrieving into a retrieval failure.
    ///
    /// Timeouts keep their own variant so callers can tell them apart.
    pub fn into_retrieval(self) -> Self {
        match self {
            err @ (AppError::Retrieval { .. } | AppError::RetrievalTimeout { .. }) => err,
            other => AppError::Retrieval { message: other.to_string() },
        }
    }

    /// Fold any failure raised while synthesizing into a synthesis failure.
    pub fn into_synthesis(self) -> Self {
        match self {
            err @ (AppError::Synthesis { .. } | AppError::SynthesisTimeout { .. }) => err,
            other => AppError::Synthesis { message: other.to_string() },
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string()
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}
