//! Error types for event-sink
//!
//! This module defines the error hierarchy for the service:
//! - Validation errors at the ingress boundary (400)
//! - Queue capacity errors (503)
//! - Persistence errors during batch commits
//! - Broker (Redis) connectivity and publish errors
//! - Configuration, database setup, accumulator and server errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what failed
//! - Preserve error chains for debugging

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for event-sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database setup errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Batch commit errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Ingestion queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Broker errors
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Accumulator lifecycle errors
    #[error("Accumulator error: {0}")]
    Accumulator(#[from] AccumulatorError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload rejected at the ingress boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Body is not valid JSON or a required field is missing/mistyped
    #[error("Invalid request: {0}")]
    MalformedPayload(String),

    /// `event_type` outside the closed enumeration
    #[error("Invalid event type '{0}'")]
    UnknownEventType(String),

    /// Numeric field that cannot be stored (NaN or infinite)
    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Ingestion queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at capacity; the event was not accepted
    #[error("Queue full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// The consumer side of the queue is gone
    #[error("Queue closed: no consumer is attached")]
    Closed,
}

/// Database setup errors (open, schema, reads)
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create database file
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Failure while committing one batch
///
/// Every variant means the surrounding transaction was rolled back and
/// none of the batch's rows are visible.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Could not open the transaction
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    /// Could not prepare the insert statement
    #[error("Failed to prepare statement: {0}")]
    Prepare(#[source] rusqlite::Error),

    /// A single row failed to insert
    #[error("Failed to insert event {index} of batch: {source}")]
    Insert {
        index: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// Commit failed
    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] rusqlite::Error),

    /// Failure reported by a non-SQLite committer
    #[error("Commit failed: {0}")]
    Other(String),
}

/// Broker (Redis) errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Could not reach the broker
    #[error("Failed to connect to broker '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Subscribing to the topic failed
    #[error("Failed to subscribe to '{topic}': {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Publishing an event failed
    #[error("Failed to publish event: {0}")]
    PublishFailed(String),

    /// Event could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Accumulator lifecycle errors
#[derive(Error, Debug)]
pub enum AccumulatorError {
    /// Thread could not be spawned
    #[error("Failed to spawn accumulator thread: {0}")]
    SpawnFailed(String),

    /// The final flush did not finish within the shutdown budget
    #[error("Accumulator did not finish within {0:?}; in-flight events may be lost")]
    ShutdownTimeout(Duration),

    /// The accumulator thread panicked
    #[error("Accumulator thread panicked")]
    Panicked,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid queue size
    #[error("Invalid queue size {size}: must be between {min} and {max}")]
    InvalidQueueSize { size: usize, min: usize, max: usize },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid flush interval
    #[error("Invalid flush interval {millis}ms: must be at least {min}ms")]
    InvalidFlushInterval { millis: u64, min: u64 },

    /// Database path error
    #[error("Invalid database path '{path}': {reason}")]
    InvalidDbPath { path: PathBuf, reason: String },

    /// Broker URL error
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    /// Bind address error
    #[error("Invalid bind address '{addr}': {reason}")]
    InvalidBindAddress { addr: String, reason: String },
}

/// HTTP server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Could not bind the listener
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server loop failed
    #[error("Server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Request failures reported to HTTP clients
#[derive(Error, Debug)]
pub enum ApiError {
    /// Rejected payload
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Queue full or closed
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Publish to the broker failed
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Analytics read failed
    #[error(transparent)]
    Database(#[from] DbError),

    /// Anything else (e.g. a blocking task that did not complete)
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Status code and client-facing message
    pub fn status_and_message(&self) -> (axum::http::StatusCode, String) {
        use axum::http::StatusCode;

        match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Queue(QueueError::CapacityExceeded { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Queue full".to_string())
            }
            ApiError::Queue(QueueError::Closed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service shutting down".to_string())
            }
            ApiError::Broker(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to publish event".to_string(),
            ),
            ApiError::Database(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for PersistenceError
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Result type alias for BrokerError
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

impl PersistenceError {
    /// Whether a retry of the same batch has a chance of succeeding
    ///
    /// Busy/locked databases are transient; constraint violations on a row
    /// will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        let source = match self {
            PersistenceError::Begin(e)
            | PersistenceError::Prepare(e)
            | PersistenceError::Commit(e) => e,
            PersistenceError::Insert { source, .. } => source,
            PersistenceError::Other(_) => return true,
        };

        match source {
            rusqlite::Error::SqliteFailure(err, _) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DiskFull
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::CapacityExceeded { capacity: 1000 };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("Queue full"));
    }

    #[test]
    fn test_error_conversion() {
        let queue_err = QueueError::Closed;
        let sink_err: SinkError = queue_err.into();
        assert!(matches!(sink_err, SinkError::Queue(_)));
    }

    #[test]
    fn test_persistence_transient_classification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(PersistenceError::Begin(busy).is_transient());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("NOT NULL constraint failed".into()),
        );
        let err = PersistenceError::Insert {
            index: 3,
            source: constraint,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("event 3"));
    }

    #[test]
    fn test_api_error_status_mapping() {
        use axum::http::StatusCode;

        let (status, _) = ApiError::from(ValidationError::UnknownEventType("x".into())).status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, message) =
            ApiError::from(QueueError::CapacityExceeded { capacity: 1 }).status_and_message();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(message, "Queue full");

        let (status, _) = ApiError::from(BrokerError::PublishFailed("down".into())).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UnknownEventType("refund".into());
        assert_eq!(err.to_string(), "Invalid event type 'refund'");
    }
}
