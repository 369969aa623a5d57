//! Shared building blocks for ProjectHub services.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error types and serde helpers
//! - `runtime`: async resilience primitives (circuit breakers, retry, usage
//!   tracking), logging through `tracing`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    AttemptRecord, BackoffStrategy, CircuitBreaker, CircuitBreakerRegistry, CircuitConfig,
    CircuitConfigOverrides, CircuitOpenError, CircuitState, CircuitStatus, Clock, ConfigError,
    Jitter, MockClock, ResilienceError, ResilienceResult, RetryConfig, RetryError,
    RetryExecutor, SystemClock, UsageTracker,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
