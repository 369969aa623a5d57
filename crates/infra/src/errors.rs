//! Error types used throughout the infrastructure layer

use projecthub_common::resilience::{
    AttemptTimeoutError, CircuitOpenError, ConfigError, ResilienceError, RetryError,
};
use thiserror::Error;

use crate::inference::BackendError;

/// Main error type for ProjectHub infrastructure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InfraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The inference backend failed on the last attempt
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The call was short-circuited; the backend was not contacted
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The last attempt exceeded its deadline
    #[error(transparent)]
    Timeout(#[from] AttemptTimeoutError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for infrastructure operations
pub type Result<T> = std::result::Result<T, InfraError>;

impl InfraError {
    /// Whether retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::CircuitOpen(_) | Self::Timeout(_))
    }
}

impl From<ConfigError> for InfraError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<RetryError<BackendError>> for InfraError {
    fn from(value: RetryError<BackendError>) -> Self {
        match value {
            RetryError::Timeout(timeout) => Self::Timeout(timeout),
            RetryError::Operation(error) => Self::Backend(error),
        }
    }
}

impl From<ResilienceError<RetryError<BackendError>>> for InfraError {
    fn from(value: ResilienceError<RetryError<BackendError>>) -> Self {
        match value {
            ResilienceError::CircuitOpen(error) => Self::CircuitOpen(error),
            ResilienceError::Operation(error) => error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_guarded_retry_errors_flatten() {
        let open: ResilienceError<RetryError<BackendError>> =
            CircuitOpenError { name: "inference.embed".to_string(), next_attempt_time: None }
                .into();
        assert!(matches!(InfraError::from(open), InfraError::CircuitOpen(_)));

        let timeout: ResilienceError<RetryError<BackendError>> = ResilienceError::Operation(
            AttemptTimeoutError { timeout: Duration::from_millis(50) }.into(),
        );
        let err = InfraError::from(timeout);
        assert_eq!(err.to_string(), "timed out after 50ms");
        assert!(err.is_transient());
    }

    #[test]
    fn test_backend_error_message_preserved() {
        let err: InfraError = RetryError::Operation(BackendError::Unavailable(
            "connection refused".to_string(),
        ))
        .into();

        assert_eq!(err.to_string(), "inference backend unavailable: connection refused");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: InfraError = projecthub_common::resilience::RetryConfig::builder()
            .max_attempts(0)
            .build()
            .expect_err("zero attempts is invalid")
            .into();

        assert!(matches!(err, InfraError::Config(ref message) if message.contains("max_attempts")));
        assert!(!err.is_transient());
    }
}
