//! Error types for the resilience layer
//!
//! The breaker manufactures exactly one error of its own
//! ([`CircuitOpenError`]) and the retry executor one more
//! ([`AttemptTimeoutError`]). Everything else is the wrapped operation's own
//! error, carried through untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Configuration validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A call was rejected without invoking the wrapped operation.
///
/// Raised while the circuit is OPEN and the recovery timeout has not
/// elapsed, or while HALF_OPEN and every probe slot is taken. Callers should
/// treat it as "retry later", not as an application failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit '{name}' is open{}", retry_hint(.next_attempt_time))]
pub struct CircuitOpenError {
    /// Name of the rejecting circuit
    pub name: String,
    /// Earliest moment a probe may be admitted, when known
    pub next_attempt_time: Option<DateTime<Utc>>,
}

fn retry_hint(next_attempt_time: &Option<DateTime<Utc>>) -> String {
    match next_attempt_time {
        Some(at) => format!(", next attempt allowed at {}", at.to_rfc3339()),
        None => String::new(),
    }
}

/// A single retry attempt did not settle before its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}ms", .timeout.as_millis())]
pub struct AttemptTimeoutError {
    pub timeout: Duration,
}

/// Failure of the final retry attempt
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The last attempt hit its per-attempt timeout
    #[error(transparent)]
    Timeout(#[from] AttemptTimeoutError),

    /// The last attempt failed with the operation's own error
    #[error(transparent)]
    Operation(E),
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the final attempt timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The operation's own error, if the final attempt produced one
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::Timeout(_) => None,
        }
    }
}

/// Outcome of a circuit-guarded call that did not succeed
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Rejected by the breaker; the operation was never invoked
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The operation ran and failed; the error is passed through verbatim
    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the call was short-circuited by the breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// The operation's own error, if the operation ran
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::CircuitOpen(_) => None,
        }
    }
}

/// Result type for circuit-guarded operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
