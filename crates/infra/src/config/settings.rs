//! Resilience settings
//!
//! Durations are written in milliseconds in every format:
//!
//! ```toml
//! sweep_interval_ms = 60000
//!
//! [circuit]
//! failure_threshold = 5
//! recovery_timeout_ms = 60000
//!
//! [retry]
//! max_attempts = 3
//! attempt_timeout_ms = 30000
//! backoff = { kind = "exponential", base_delay_ms = 1000 }
//!
//! [health]
//! interval_ms = 30000
//! ```

use std::time::Duration;

use projecthub_common::duration_millis;
use projecthub_common::resilience::{CircuitConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{InfraError, Result};

/// Health check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSettings {
    pub enabled: bool,
    #[serde(with = "duration_millis", rename = "interval_ms")]
    pub interval: Duration,
    /// Deadline for a single health check
    #[serde(with = "duration_millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Config for the `inference.health` circuit; trips sooner than the
    /// inference circuits
    pub circuit: CircuitConfig,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            circuit: CircuitConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                monitoring_period: Duration::from_secs(120),
                half_open_max_calls: 1,
            },
        }
    }
}

/// Everything the resilience layer reads from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Defaults for circuits created without overrides
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub health: HealthCheckSettings,
    /// How often stale failure counts are swept
    #[serde(with = "duration_millis", rename = "sweep_interval_ms")]
    pub sweep_interval: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            health: HealthCheckSettings::default(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ResilienceSettings {
    /// Validate every section
    ///
    /// # Errors
    /// Returns `InfraError::Config` naming the offending section.
    pub fn validate(&self) -> Result<()> {
        self.circuit.validate().map_err(|e| section_error("circuit", &e))?;
        self.retry.validate().map_err(|e| section_error("retry", &e))?;
        self.health.circuit.validate().map_err(|e| section_error("health.circuit", &e))?;

        if self.health.enabled && self.health.interval.is_zero() {
            return Err(InfraError::Config("health.interval must be greater than 0".to_string()));
        }
        if self.health.timeout.is_zero() {
            return Err(InfraError::Config("health.timeout must be greater than 0".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(InfraError::Config("sweep_interval must be greater than 0".to_string()));
        }
        Ok(())
    }
}

fn section_error(section: &str, error: &dyn std::error::Error) -> InfraError {
    InfraError::Config(format!("[{section}] {error}"))
}

#[cfg(test)]
mod tests {
    use projecthub_common::resilience::BackoffStrategy;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ResilienceSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.health.circuit.failure_threshold < settings.circuit.failure_threshold);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: ResilienceSettings = toml::from_str(
            r#"
sweep_interval_ms = 1000

[circuit]
failure_threshold = 2

[retry]
max_attempts = 5
backoff = { kind = "fixed", delay_ms = 250 }
"#,
        )
        .expect("valid toml");

        assert_eq!(settings.circuit.failure_threshold, 2);
        assert_eq!(settings.circuit.recovery_timeout, Duration::from_secs(60));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.backoff, BackoffStrategy::Fixed { delay: Duration::from_millis(250) });
        assert_eq!(settings.sweep_interval, Duration::from_secs(1));
        assert_eq!(settings.health, HealthCheckSettings::default());
    }

    #[test]
    fn test_validation_names_section() {
        let mut settings = ResilienceSettings::default();
        settings.health.circuit.half_open_max_calls = 0;

        let err = settings.validate().expect_err("invalid health circuit");
        assert!(err.to_string().contains("[health.circuit]"));
    }
}
