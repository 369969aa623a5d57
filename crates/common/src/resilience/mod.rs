//! Resilience layer for calls to the inference service
//!
//! Two independent patterns that compose:
//! - **Circuit breaker** ([`CircuitBreaker`], [`CircuitBreakerRegistry`]):
//!   one breaker per logical operation, tripping after a run of consecutive
//!   failures and probing for recovery after a timeout.
//! - **Retry executor** ([`RetryExecutor`]): bounded attempts with a
//!   per-attempt timeout and exponential backoff, reporting every attempt to
//!   a [`UsageTracker`].
//!
//! The intended composition is breaker outside, retry inside:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use projecthub_common::resilience::{
//!     CircuitBreakerRegistry, RetryConfig, RetryExecutor, TracingUsageTracker,
//! };
//!
//! # async fn call_backend() -> Result<Vec<f32>, std::io::Error> { Ok(vec![]) }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CircuitBreakerRegistry::default();
//! let retry = RetryExecutor::new(RetryConfig::default(), Arc::new(TracingUsageTracker))?;
//!
//! let embedding = registry
//!     .execute("inference.embed", || retry.run("inference.embed", 12, call_backend))
//!     .await?;
//! # let _ = embedding;
//! # Ok(())
//! # }
//! ```
//!
//! One `execute` is one breaker probe, however many attempts the retry
//! executor makes inside it.

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod registry;
pub mod retry;
pub mod usage;

pub use circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitConfigBuilder, CircuitConfigOverrides, CircuitState,
    CircuitStatus,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{
    AttemptTimeoutError, CircuitOpenError, ConfigError, ConfigResult, ResilienceError,
    ResilienceResult, RetryError,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryExecutor, RetryOutcome,
    RetryResult,
};
pub use usage::{
    AttemptRecord, InMemoryUsageTracker, NoopUsageTracker, TracingUsageTracker, UsageSummary,
    UsageTracker,
};
