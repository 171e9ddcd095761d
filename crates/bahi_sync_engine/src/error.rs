//! Error types for the sync engine.

use bahi_core::{CoreError, RecordId, Table};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine's public operations.
///
/// Conflicts between concurrent writes are not represented here: they are
/// absorbed by reconciliation and never surface to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No owner identity is available; the remote call was never attempted.
    #[error("no authenticated owner available")]
    Unauthenticated,

    /// The payload was rejected, locally at the boundary or by the remote
    /// store. Fatal; the mutation is rolled back.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// A network-level failure.
    #[error("transient failure: {message}")]
    Transient {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The target record is unknown to this client.
    #[error("no record {id} in table {table}")]
    NotFound {
        /// The table searched.
        table: Table,
        /// The missing id.
        id: RecordId,
    },

    /// The upstream change feed closed unexpectedly.
    #[error("change feed for table {0} closed")]
    FeedClosed(Table),
}

impl EngineError {
    /// Creates a retryable transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transient error.
    pub fn transient_fatal(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(table: Table, id: RecordId) -> Self {
        Self::NotFound { table, id }
    }

    /// Returns true if this error can be retried with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transient { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::ValidationRejected(err.to_string())
    }
}
