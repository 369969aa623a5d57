//! Registry of named circuit breakers
//!
//! Circuits are created lazily on first use and live for the lifetime of the
//! registry. Creation is idempotent: concurrent first calls for the same name
//! observe one shared breaker.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitConfigOverrides, CircuitStatus,
};
use super::clock::{Clock, SystemClock};
use super::error::{ConfigResult, ResilienceResult};
use crate::utils::serde::duration_millis;

/// Process-wide map from operation name to its circuit breaker
pub struct CircuitBreakerRegistry<C: Clock = SystemClock> {
    defaults: CircuitConfig,
    circuits: RwLock<HashMap<String, Arc<CircuitBreaker<C>>>>,
    clock: Arc<C>,
}

impl<C: Clock> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("defaults", &self.defaults)
            .field("circuits", &self.len())
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create a registry whose circuits use the system clock
    pub fn new(defaults: CircuitConfig) -> ConfigResult<Self> {
        Self::with_clock(defaults, SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self {
            defaults: CircuitConfig::default(),
            circuits: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C: Clock> CircuitBreakerRegistry<C> {
    /// Create a registry whose circuits read time from `clock`
    pub fn with_clock(defaults: CircuitConfig, clock: C) -> ConfigResult<Self> {
        defaults.validate()?;
        Ok(Self { defaults, circuits: RwLock::new(HashMap::new()), clock: Arc::new(clock) })
    }

    /// Config used for circuits created without overrides
    pub fn defaults(&self) -> &CircuitConfig {
        &self.defaults
    }

    /// Number of circuits created so far
    pub fn len(&self) -> usize {
        self.circuits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.circuits.read().contains_key(name)
    }

    /// Get the circuit for `name`, creating it with `overrides` merged over
    /// the defaults if it does not exist yet.
    ///
    /// Overrides given for an existing circuit are ignored.
    pub fn circuit(
        &self,
        name: &str,
        overrides: Option<&CircuitConfigOverrides>,
    ) -> Arc<CircuitBreaker<C>> {
        let existing = self.circuits.read().get(name).cloned();
        if let Some(breaker) = existing {
            self.note_ignored_overrides(&breaker, overrides);
            return breaker;
        }

        let config = overrides.map_or_else(|| self.defaults.clone(), |o| o.apply_to(&self.defaults));
        let mut circuits = self.circuits.write();
        let mut created = false;
        let breaker = Arc::clone(circuits.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(CircuitBreaker::from_parts(name.to_string(), config, Arc::clone(&self.clock)))
        }));
        drop(circuits);

        if created {
            let config = breaker.config();
            debug!(
                circuit = %name,
                failure_threshold = config.failure_threshold,
                recovery_timeout_ms = duration_millis::to_millis(&config.recovery_timeout),
                "Created circuit breaker"
            );
        } else {
            self.note_ignored_overrides(&breaker, overrides);
        }
        breaker
    }

    fn note_ignored_overrides(
        &self,
        breaker: &CircuitBreaker<C>,
        overrides: Option<&CircuitConfigOverrides>,
    ) {
        if let Some(overrides) = overrides {
            if &overrides.apply_to(&self.defaults) != breaker.config() {
                debug!(
                    circuit = %breaker.name(),
                    "Ignoring config overrides for existing circuit"
                );
            }
        }
    }

    /// Run `operation` under the circuit named `name` with default config
    pub async fn execute<F, Fut, T, E>(&self, name: &str, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with(name, None, operation).await
    }

    /// Run `operation` under the circuit named `name`, creating it with
    /// `overrides` if this is the first call for that name
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        name: &str,
        overrides: Option<&CircuitConfigOverrides>,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.circuit(name, overrides);
        breaker.execute(operation).await
    }

    /// Snapshot of one circuit. Unknown names report a fresh CLOSED circuit
    /// with default config and are not created.
    pub fn get_status(&self, name: &str) -> CircuitStatus {
        match self.circuits.read().get(name) {
            Some(breaker) => breaker.status(),
            None => CircuitStatus::never_used(name, self.defaults.clone()),
        }
    }

    /// Snapshots of every known circuit, ordered by name
    pub fn get_all_statuses(&self) -> BTreeMap<String, CircuitStatus> {
        let breakers: Vec<_> = self.circuits.read().values().cloned().collect();
        breakers.iter().map(|breaker| (breaker.name().to_string(), breaker.status())).collect()
    }

    /// Force a circuit back to CLOSED. Returns `false` for unknown names.
    pub fn reset(&self, name: &str) -> bool {
        let breaker = self.circuits.read().get(name).cloned();
        match breaker {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every known circuit
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.circuits.read().values().cloned().collect();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(circuits = breakers.len(), "Reset all circuit breakers");
    }

    /// The config bound to an existing circuit
    pub fn config_in_effect(&self, name: &str) -> Option<CircuitConfig> {
        self.circuits.read().get(name).map(|breaker| breaker.config().clone())
    }

    /// Clear stale failure memory on every CLOSED circuit. Returns the
    /// number of circuits swept.
    pub fn sweep_stale_failures(&self) -> usize {
        let breakers: Vec<_> = self.circuits.read().values().cloned().collect();
        breakers.iter().filter(|breaker| breaker.sweep_stale_failures()).count()
    }

    /// Spawn a task that calls [`sweep_stale_failures`](Self::sweep_stale_failures)
    /// every `interval` until `cancel` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Circuit sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let swept = registry.sweep_stale_failures();
                        if swept > 0 {
                            debug!(swept, "Cleared stale circuit failure counts");
                        }
                    }
                }
            }
        })
    }
}
