//! Error types for the record model boundary.

use thiserror::Error;

/// Result type for core model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised when validating data at the model boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A payload or patch tried to shadow a fixed core column.
    #[error("payload may not contain reserved key {key:?}")]
    ReservedKey {
        /// The offending key.
        key: String,
    },

    /// A payload was not a JSON object.
    #[error("payload must be a JSON object, got {found}")]
    NotAnObject {
        /// Description of what was found instead.
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::ReservedKey {
            key: "deleted_at".into(),
        };
        assert!(err.to_string().contains("deleted_at"));

        let err = CoreError::NotAnObject {
            found: "array".into(),
        };
        assert!(err.to_string().contains("array"));
    }
}
