//! Per-operation circuit breaker
//!
//! A breaker guards one named operation and decides, from the outcome of
//! previous calls and the clock, whether the next call is allowed, admitted
//! as a cautious probe, or rejected outright.
//!
//! ```text
//! CLOSED    --(failure_count >= failure_threshold)--> OPEN
//! OPEN      --(now >= next_attempt_time)------------> HALF_OPEN
//! HALF_OPEN --(probe succeeds)----------------------> CLOSED
//! HALF_OPEN --(probe fails)-------------------------> OPEN
//! ```
//!
//! Each `execute()` is one probe no matter how much retrying the wrapped
//! operation does internally, so the threshold counts fully exhausted
//! operations rather than raw network attempts.
//!
//! All record fields live behind a single mutex. Admission (including the
//! OPEN → HALF_OPEN flip and the half-open slot increment) and outcome
//! bookkeeping are each one critical section; the wrapped operation itself
//! runs outside the lock.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::error::{CircuitOpenError, ConfigError, ConfigResult, ResilienceResult};
use super::ResilienceError;
use crate::utils::serde::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency judged unhealthy, calls fail fast
    Open,
    /// Cautious recovery, a bounded number of probes are admitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration bound to a circuit at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failed probes in CLOSED before tripping to OPEN
    pub failure_threshold: u32,
    /// How long OPEN lasts before a probe is admitted
    #[serde(with = "duration_millis", rename = "recovery_timeout_ms")]
    pub recovery_timeout: Duration,
    /// Age after which a CLOSED circuit's failure memory is swept
    #[serde(with = "duration_millis", rename = "monitoring_period_ms")]
    pub monitoring_period: Duration,
    /// Probes admitted per HALF_OPEN episode
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(300),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitConfigBuilder {
        CircuitConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for [`CircuitConfig`]
#[derive(Debug, Default)]
pub struct CircuitConfigBuilder {
    config: CircuitConfig,
}

impl CircuitConfigBuilder {
    /// Start from the default config
    pub fn new() -> Self {
        Self { config: CircuitConfig::default() }
    }

    /// Consecutive failures before the circuit opens
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// How long the circuit stays open before admitting a probe
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Age after which a closed circuit forgets its failures
    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.config.monitoring_period = period;
        self
    }

    /// Probes admitted while half-open
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Validate and return the config
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if a field is out of range.
    pub fn build(self) -> ConfigResult<CircuitConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-call configuration overrides, merged over registry defaults when a
/// circuit is first created.
///
/// Overrides passed for a circuit that already exists are ignored: the
/// config bound at creation wins for the circuit's whole lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitConfigOverrides {
    failure_threshold: Option<u32>,
    recovery_timeout: Option<Duration>,
    monitoring_period: Option<Duration>,
    half_open_max_calls: Option<u32>,
}

impl CircuitConfigOverrides {
    /// Override nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Override the recovery timeout
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = Some(timeout);
        self
    }

    /// Override the monitoring period
    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = Some(period);
        self
    }

    /// Override the half-open probe limit
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.half_open_max_calls = Some(max_calls);
        self
    }

    /// Validate the overrides so that merging them over a valid default can
    /// never produce an invalid config
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for a zero threshold or probe limit.
    pub fn build(self) -> ConfigResult<Self> {
        if self.failure_threshold == Some(0) {
            return Err(ConfigError::invalid("failure_threshold override must be greater than 0"));
        }
        if self.half_open_max_calls == Some(0) {
            return Err(ConfigError::invalid(
                "half_open_max_calls override must be greater than 0",
            ));
        }
        Ok(self)
    }

    /// Merge these overrides over `base`
    pub fn apply_to(&self, base: &CircuitConfig) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            recovery_timeout: self.recovery_timeout.unwrap_or(base.recovery_timeout),
            monitoring_period: self.monitoring_period.unwrap_or(base.monitoring_period),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(base.half_open_max_calls),
        }
    }
}

impl From<&CircuitConfig> for CircuitConfigOverrides {
    fn from(config: &CircuitConfig) -> Self {
        Self {
            failure_threshold: Some(config.failure_threshold),
            recovery_timeout: Some(config.recovery_timeout),
            monitoring_period: Some(config.monitoring_period),
            half_open_max_calls: Some(config.half_open_max_calls),
        }
    }
}

/// Read-only snapshot of one circuit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_calls: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub config: CircuitConfig,
}

impl CircuitStatus {
    /// Status reported for a circuit that has never been used
    pub fn never_used(name: &str, config: CircuitConfig) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_calls: 0,
            last_failure_time: None,
            next_attempt_time: None,
            total_calls: 0,
            rejected_calls: 0,
            config,
        }
    }
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    half_open_calls: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_calls: 0,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }

    fn enter_closed(&mut self) {
        *self = Self::closed();
    }

    fn enter_open(&mut self, now: Instant, recovery_timeout: Duration) {
        self.state = CircuitState::Open;
        self.half_open_calls = 0;
        self.next_attempt_time = Some(now + recovery_timeout);
    }

    fn enter_half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.half_open_calls = 0;
        self.next_attempt_time = None;
    }
}

/// Circuit breaker guarding a single named operation
///
/// Normally obtained from a
/// [`CircuitBreakerRegistry`](super::registry::CircuitBreakerRegistry) and
/// shared behind an `Arc`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitConfig,
    record: Mutex<CircuitRecord>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a standalone breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker reading time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitConfig,
        clock: Arc<C>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(name.into(), config, clock))
    }

    /// Construct from an already validated config
    pub(crate) fn from_parts(name: String, config: CircuitConfig, clock: Arc<C>) -> Self {
        Self {
            name,
            config,
            record: Mutex::new(CircuitRecord::closed()),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            clock,
        }
    }

    /// Circuit name, e.g. `inference.embed`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The config bound to this circuit
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state, without transitioning an expired OPEN circuit
    pub fn state(&self) -> CircuitState {
        self.record.lock().state
    }

    /// Run `operation` under the breaker's protection.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `operation`
    /// when the circuit rejects the call; otherwise the operation's own
    /// error is returned untouched in [`ResilienceError::Operation`].
    ///
    /// Dropping the returned future while the operation is in flight counts
    /// as a failed probe.
    #[instrument(skip(self, operation), fields(circuit = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let admitted_as = self.try_acquire()?;
        debug!(state = %admitted_as, "Call admitted");

        let probe = ProbeGuard { breaker: self, settled: false };
        let result = operation().await;
        probe.settle(result.is_ok());

        result.map_err(ResilienceError::Operation)
    }

    /// Decide whether a call may proceed, reserving a half-open slot if
    /// needed. Returns the state the call was admitted under.
    fn try_acquire(&self) -> Result<CircuitState, CircuitOpenError> {
        let now = self.clock.now();
        let mut record = self.record.lock();

        if record.state == CircuitState::Open {
            let due = record.next_attempt_time.map_or(true, |at| now >= at);
            if !due {
                let next_attempt_time = record.next_attempt_time;
                drop(record);
                return Err(self.reject(next_attempt_time));
            }
            record.enter_half_open();
            info!(circuit = %self.name, "Circuit breaker half-open, admitting probe");
        }

        if record.state == CircuitState::HalfOpen {
            if record.half_open_calls >= self.config.half_open_max_calls {
                drop(record);
                return Err(self.reject(None));
            }
            record.half_open_calls += 1;
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(record.state)
    }

    fn reject(&self, next_attempt_time: Option<Instant>) -> CircuitOpenError {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        debug!(circuit = %self.name, "Circuit breaker rejecting call");
        CircuitOpenError {
            name: self.name.clone(),
            next_attempt_time: next_attempt_time.map(|at| self.clock.to_wall_clock(at)),
        }
    }

    fn on_success(&self) {
        let mut record = self.record.lock();
        match record.state {
            CircuitState::HalfOpen => {
                record.enter_closed();
                drop(record);
                info!(circuit = %self.name, "Circuit breaker closed after successful probe");
            }
            CircuitState::Closed => record.failure_count = 0,
            CircuitState::Open => {
                // A call admitted before the trip finished late; it says
                // nothing about the dependency now.
                debug!(circuit = %self.name, "Ignoring success reported while circuit is open");
            }
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now();
        let mut record = self.record.lock();
        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_time = Some(now);
        let failure_count = record.failure_count;

        match record.state {
            CircuitState::HalfOpen => {
                record.enter_open(now, self.config.recovery_timeout);
                drop(record);
                warn!(circuit = %self.name, "Circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed if failure_count >= self.config.failure_threshold => {
                record.enter_open(now, self.config.recovery_timeout);
                drop(record);
                warn!(
                    circuit = %self.name,
                    failure_count,
                    recovery_timeout_ms = duration_millis::to_millis(&self.config.recovery_timeout),
                    "Circuit breaker opened"
                );
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Snapshot of the circuit
    pub fn status(&self) -> CircuitStatus {
        let (state, failure_count, half_open_calls, last_failure_time, next_attempt_time) = {
            let record = self.record.lock();
            (
                record.state,
                record.failure_count,
                record.half_open_calls,
                record.last_failure_time,
                record.next_attempt_time,
            )
        };

        CircuitStatus {
            name: self.name.clone(),
            state,
            failure_count,
            half_open_calls,
            last_failure_time: last_failure_time.map(|at| self.clock.to_wall_clock(at)),
            next_attempt_time: next_attempt_time.map(|at| self.clock.to_wall_clock(at)),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            config: self.config.clone(),
        }
    }

    /// Force the circuit back to CLOSED with zeroed counters
    pub fn reset(&self) {
        self.record.lock().enter_closed();
        info!(circuit = %self.name, "Circuit breaker manually reset to closed state");
    }

    /// Forget the failure memory of a CLOSED circuit whose last failure is
    /// older than `monitoring_period`. Returns whether anything was cleared.
    pub fn sweep_stale_failures(&self) -> bool {
        let now = self.clock.now();
        let mut record = self.record.lock();

        let stale = record.state == CircuitState::Closed
            && record.failure_count > 0
            && record
                .last_failure_time
                .is_some_and(|at| now.duration_since(at) >= self.config.monitoring_period);

        if stale {
            record.failure_count = 0;
            record.last_failure_time = None;
        }
        stale
    }
}

/// Reports a probe's outcome exactly once, treating an abandoned probe as a
/// failure.
struct ProbeGuard<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    settled: bool,
}

impl<C: Clock> ProbeGuard<'_, C> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success();
        } else {
            self.breaker.on_failure();
        }
    }
}

impl<C: Clock> Drop for ProbeGuard<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(circuit = %self.breaker.name, "Probe abandoned before completion, counting as failure");
            self.breaker.on_failure();
        }
    }
}
