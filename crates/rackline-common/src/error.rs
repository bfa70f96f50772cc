//! Error types for Rackline
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for Rackline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Rackline
#[derive(Debug, Error)]
pub enum Error {
    // Not-found errors
    #[error("log not found: {0}")]
    LogNotFound(String),

    #[error("log meta not found: {0}")]
    MetaNotFound(String),

    #[error("segment not found: {log_key} at offset {offset}")]
    SegmentNotFound { log_key: String, offset: u64 },

    // Argument errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid bucket width {0:?}: use forms like \"1H\", \"1D\", \"1W\", \"1M\"")]
    InvalidBucketWidth(String),

    // Integrity errors
    #[error("segment corrupted: {0}")]
    Corrupted(String),

    // Role errors
    #[error("mutation attempted on follower: {0}")]
    RoleViolation(&'static str),

    // Storage errors (redb is the ordered durable store primitive)
    #[error("store error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("store storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("store table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("store transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),

    #[error("store commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Control channel errors
    #[error("control channel error: {0}")]
    Control(String),

    #[error("request timeout")]
    Timeout,
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a control channel error
    pub fn control(msg: impl Into<String>) -> Self {
        Self::Control(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::LogNotFound(_) | Self::MetaNotFound(_) | Self::SegmentNotFound { .. }
        )
    }

    /// Check if this is a transient error (retry may succeed)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Storage(_)
                | Self::Table(_)
                | Self::Transaction(_)
                | Self::Commit(_)
                | Self::Io(_)
                | Self::Control(_)
                | Self::Timeout
        )
    }
}
