//! Retry executor with per-attempt timeout and exponential backoff
//!
//! Every error is considered retryable, including timeouts. Each attempt is
//! raced against `attempt_timeout`; between attempts the executor sleeps
//! according to the configured [`BackoffStrategy`] and [`Jitter`]. After the
//! final attempt the last error is returned unchanged.
//!
//! Every attempt, successful or not, is reported to a [`UsageTracker`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::{AttemptTimeoutError, ConfigError, ConfigResult, RetryError};
use super::usage::{AttemptRecord, NoopUsageTracker, UsageTracker};
use crate::utils::serde::duration_millis;

/// Result type for retried operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Result of a retry run together with how it got there
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub result: RetryResult<T, E>,
    /// Attempts actually made, including the last one
    pub attempts: u32,
    /// Total time spent sleeping between attempts
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Drop the attempt metadata
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }
}

/// How the delay grows between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed {
        #[serde(with = "duration_millis", rename = "delay_ms")]
        delay: Duration,
    },
    /// `base_delay * 2^(attempt - 1)`, optionally capped
    Exponential {
        #[serde(with = "duration_millis", rename = "base_delay_ms")]
        base_delay: Duration,
        #[serde(default, with = "duration_millis::option", rename = "max_delay_ms")]
        max_delay: Option<Duration>,
    },
}

impl BackoffStrategy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base_delay, max_delay } => {
                let exponent = attempt.saturating_sub(1);
                let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
                let delay = base_delay.saturating_mul(factor);
                max_delay.map_or(delay, |cap| delay.min(cap))
            }
        }
    }
}

/// Randomisation applied on top of the backoff delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the computed delay as is
    #[default]
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`
    Equal,
}

impl Jitter {
    /// Randomize `delay` according to this strategy
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = duration_millis::to_millis(&delay);
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub jitter: Jitter,
    /// Deadline applied to each attempt individually
    #[serde(with = "duration_millis", rename = "attempt_timeout_ms")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                base_delay: Duration::from_secs(1),
                max_delay: None,
            },
            jitter: Jitter::None,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Start a [`RetryConfigBuilder`] from the defaults
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Check attempt count, timeout and backoff cap
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }

        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::invalid("attempt_timeout must be greater than 0"));
        }

        if let BackoffStrategy::Exponential { base_delay, max_delay: Some(max_delay) } =
            &self.backoff
        {
            if max_delay < base_delay {
                return Err(ConfigError::invalid("max_delay must not be below base_delay"));
            }
        }

        Ok(())
    }

    /// Sleep to take after failed attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.calculate_delay(attempt))
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Start from the default config
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sleep the same `delay` between every attempt
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed { delay };
        self
    }

    /// Sleep `base_delay * 2^(attempt-1)` with no upper bound
    pub fn exponential_backoff(mut self, base_delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { base_delay, max_delay: None };
        self
    }

    /// Exponential backoff that never sleeps longer than `max_delay`
    pub fn capped_exponential_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.config.backoff =
            BackoffStrategy::Exponential { base_delay, max_delay: Some(max_delay) };
        self
    }

    /// Use the computed delay as-is
    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    /// Randomize each delay over `[0, delay]`
    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    /// Randomize each delay over `[delay / 2, delay]`
    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    /// Deadline for a single attempt
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    /// Validate and return the config
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if a field is out of range.
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs an operation up to `max_attempts` times, reporting every attempt
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    tracker: Arc<dyn UsageTracker>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").field("config", &self.config).finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Create an executor reporting attempts to `tracker`
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if `config` does not validate.
    pub fn new(config: RetryConfig, tracker: Arc<dyn UsageTracker>) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, tracker })
    }

    /// Executor whose attempts are not reported anywhere
    pub fn untracked(config: RetryConfig) -> ConfigResult<Self> {
        Self::new(config, Arc::new(NoopUsageTracker))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` with retries, returning its value or the last error
    pub async fn run<F, Fut, T, E>(
        &self,
        endpoint: &str,
        approximate_cost: u64,
        operation: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_with_outcome(endpoint, approximate_cost, operation).await.into_result()
    }

    /// Like [`run`](Self::run), also reporting attempts made and time slept
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn run_with_outcome<F, Fut, T, E>(
        &self,
        endpoint: &str,
        approximate_cost: u64,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            let started = Instant::now();
            let result = match tokio::time::timeout(self.config.attempt_timeout, operation()).await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(RetryError::Operation(error)),
                Err(_) => Err(RetryError::Timeout(AttemptTimeoutError {
                    timeout: self.config.attempt_timeout,
                })),
            };

            self.tracker
                .record_attempt(AttemptRecord {
                    endpoint: endpoint.to_string(),
                    attempt,
                    approximate_cost,
                    elapsed: started.elapsed(),
                    success: result.is_ok(),
                    error_message: result.as_ref().err().map(ToString::to_string),
                })
                .await;

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) if attempt >= self.config.max_attempts => {
                    warn!(attempts = attempt, error = %error, "Retry attempts exhausted");
                    return RetryOutcome { result: Err(error), attempts: attempt, total_delay };
                }
                Err(error) => {
                    let delay = self.config.delay_for(attempt);
                    debug!(
                        attempt,
                        delay_ms = duration_millis::to_millis(&delay),
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                    attempt += 1;
                }
            }
        }
    }
}
