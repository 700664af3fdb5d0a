//! Error types for counter-server.

use std::path::PathBuf;

/// Main error type for counter-server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Connection capacity reached.
    #[error("connection limit reached ({limit})")]
    AtCapacity {
        /// Configured maximum.
        limit: usize,
    },

    /// Event dropped by rate limiting.
    #[error("rate limited: {0}")]
    RateLimited(#[from] crate::limits::RateLimitError),

    /// The service is shutting down and accepts no new work.
    #[error("service is shutting down")]
    ShuttingDown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store call did not finish in time.
    #[error("store {op} timed out after {after_ms}ms")]
    Timeout {
        /// Operation name (get, set, incr).
        op: &'static str,
        /// Configured timeout.
        after_ms: u64,
    },

    /// A key holds something other than an integer.
    #[error("key {key} holds a non-integer value: {value:?}")]
    NotAnInteger {
        /// The key.
        key: String,
        /// The raw stored value.
        value: String,
    },

    /// The store is unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was closed and accepts no further calls.
    #[error("store is closed")]
    Closed,

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl StoreError {
    /// Whether the store may have applied the call despite the error.
    ///
    /// A timeout only abandons the reply; the write itself can still land.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

/// Client transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be decoded.
    #[error("message decoding failed: {0}")]
    Wire(#[from] counter_types::WireError),

    /// WebSocket transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
