//! Error types for kaizoku-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Bridge, Database, Archive, etc.)
//! - The closed `ErrorKind` taxonomy driving queue-level retry decisions
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for kaizoku-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kaizoku-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage_root")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Extension bridge error
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Archive packaging or verification error
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Queue item not found
    #[error("item {0} not found")]
    ItemNotFound(i64),

    /// Series not found
    #[error("series {0} not found")]
    SeriesNotFound(i64),

    /// Source binding not found
    #[error("source binding {0} not found")]
    BindingNotFound(i64),

    /// Cannot perform the operation in the item's current state
    #[error("cannot {operation} item {id} in state {current_state}")]
    InvalidState {
        /// The item in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "retry", "delete")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// No enabled source binding is eligible for a chapter build
    #[error("no eligible source for series {series_id}")]
    NoEligibleSource {
        /// The series whose bindings were all skipped
        series_id: i64,
    },

    /// Operation was cancelled by the caller or shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new items
    #[error("shutdown in progress: not accepting new items")]
    ShuttingDown,

    /// Unknown progress session id
    #[error("unknown progress session: {0}")]
    UnknownSession(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors from the extension bridge client
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The requested resource does not exist at the host (HTTP 404)
    #[error("not found: {method} {path}")]
    NotFound {
        /// HTTP method of the failed request
        method: &'static str,
        /// Request path
        path: String,
    },

    /// The host kept throttling after the client's own retries (HTTP 429)
    #[error("rate limited after {attempts} attempts: {path}")]
    RateLimited {
        /// Request path
        path: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Non-2xx response other than 404/429
    #[error("{method} {path} returned {status}: {snippet}")]
    Status {
        /// HTTP method of the failed request
        method: &'static str,
        /// Request path
        path: String,
        /// HTTP status code
        status: u16,
        /// Truncated response body for diagnostics
        snippet: String,
    },

    /// Transport-level failure (connect, timeout, TLS, ...)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

/// Archive packaging and verification errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Writing the archive failed
    #[error("failed to write archive {path}: {reason}")]
    WriteFailed {
        /// Target archive path
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },

    /// A freshly written archive did not pass verification
    #[error("archive {path} failed verification: {reason}")]
    VerificationFailed {
        /// Archive path
        path: PathBuf,
        /// The reason verification failed
        reason: String,
    },

    /// The descriptor entry is missing or unreadable
    #[error("archive {path} has no readable descriptor")]
    MissingDescriptor {
        /// Archive path
        path: PathBuf,
    },
}

/// Closed taxonomy of failure kinds, used for queue-level retry
/// decisions and operator reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure
    Network,
    /// Request deadline exceeded
    Timeout,
    /// Bridge signalled throttling after its own retries
    RateLimit,
    /// Bridge returned 5xx
    ServerError,
    /// Resource missing in a terminal sense
    NotFound,
    /// Unexpected response shape; a bug signal
    Parse,
    /// Caller cancellation or shutdown
    Cancelled,
    /// Archive write or verification failure
    Packaging,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Whether the dispatcher may reschedule an item that failed with
    /// this kind.
    pub fn is_retriable(&self) -> bool {
        match self {
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::RateLimit
            | ErrorKind::ServerError
            | ErrorKind::Packaging
            | ErrorKind::Unknown => true,
            ErrorKind::NotFound | ErrorKind::Parse | ErrorKind::Cancelled => false,
        }
    }

    /// Stable string form, stored in the `error_kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Parse => "parse",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Packaging => "packaging",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Parse the stable string form back; unknown strings map to Unknown
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "network" => ErrorKind::Network,
            "timeout" => ErrorKind::Timeout,
            "rate_limit" => ErrorKind::RateLimit,
            "server_error" => ErrorKind::ServerError,
            "not_found" => ErrorKind::NotFound,
            "parse" => ErrorKind::Parse,
            "cancelled" => ErrorKind::Cancelled,
            "packaging" => ErrorKind::Packaging,
            _ => ErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify an error into the closed retry taxonomy.
    ///
    /// Classification happens once, at the chapter-builder boundary;
    /// everything above works with the resulting kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Cancelled | Error::ShuttingDown => ErrorKind::Cancelled,
            Error::Bridge(e) => match e {
                BridgeError::NotFound { .. } => ErrorKind::NotFound,
                BridgeError::RateLimited { .. } => ErrorKind::RateLimit,
                BridgeError::Status { status, .. } if *status >= 500 => ErrorKind::ServerError,
                BridgeError::Status { .. } => ErrorKind::Unknown,
                BridgeError::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
                BridgeError::Transport(_) => ErrorKind::Network,
                BridgeError::Decode(_) => ErrorKind::Parse,
            },
            Error::Archive(_) => ErrorKind::Packaging,
            Error::Io(_) => ErrorKind::Packaging,
            Error::Serialization(_) => ErrorKind::Parse,
            Error::NoEligibleSource { .. }
            | Error::ItemNotFound(_)
            | Error::SeriesNotFound(_)
            | Error::BindingNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Unknown,
        }
    }

    /// True when this error is the bridge's distinguished 404 signal
    pub fn is_bridge_not_found(&self) -> bool {
        matches!(self, Error::Bridge(BridgeError::NotFound { .. }))
    }
}

/// API error response format
///
/// Returned by API endpoints when an error occurs, with a
/// machine-readable code, a human-readable message, and optional
/// contextual details.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_state")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,

            Error::ItemNotFound(_)
            | Error::SeriesNotFound(_)
            | Error::BindingNotFound(_)
            | Error::UnknownSession(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            Error::InvalidState { .. } => 409,

            Error::NoEligibleSource { .. } => 422,
            Error::Archive(_) => 422,

            Error::Database(_) | Error::Sqlx(_) | Error::Io(_) => 500,
            Error::Serialization(_) | Error::ApiServerError(_) | Error::Other(_) => 500,

            Error::Bridge(_) => 502,

            Error::ShuttingDown | Error::Cancelled => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Bridge(_) => "bridge_error",
            Error::Archive(_) => "archive_error",
            Error::ItemNotFound(_) => "item_not_found",
            Error::SeriesNotFound(_) => "series_not_found",
            Error::BindingNotFound(_) => "binding_not_found",
            Error::InvalidState { .. } => "invalid_state",
            Error::NoEligibleSource { .. } => "no_eligible_source",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::UnknownSession(_) => "unknown_session",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::ItemNotFound(id) => Some(serde_json::json!({ "item_id": id })),
            Error::SeriesNotFound(id) => Some(serde_json::json!({ "series_id": id })),
            Error::InvalidState {
                id,
                operation,
                current_state,
            } => Some(serde_json::json!({
                "item_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::NoEligibleSource { series_id } => {
                Some(serde_json::json!({ "series_id": series_id }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
