//! Error types for the service layer.

use bahi_sync_engine::EngineError;
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the typed entity services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Domain validation failed before the write reached the engine.
    #[error("domain validation failed: {0}")]
    Invalid(String),

    /// The engine rejected or failed the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The entity could not be serialized into a record payload.
    #[error("could not encode entity: {0}")]
    Encode(String),

    /// A record payload could not be decoded into the entity type.
    #[error("could not decode record: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Creates a domain validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_pass_through() {
        let err: ServiceError = EngineError::Unauthenticated.into();
        assert_eq!(err.to_string(), "no authenticated owner available");
    }

    #[test]
    fn invalid_display() {
        let err = ServiceError::invalid("name must not be empty");
        assert!(err.to_string().contains("name must not be empty"));
    }
}
