//! Inference health monitoring with explicit lifecycle
//!
//! Periodically checks the inference service through
//! [`ResilientInferenceClient::check_health`], which runs under the
//! `inference.health` circuit, and notifies a listener when the observed
//! status changes.
//!
//! # Architecture
//!
//! - `HealthMonitor`: lifecycle coordinator (owns the task handle)
//! - `health_worker()`: the polling loop
//! - `HealthStatusListener`: downstream event handling
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use projecthub_infra::inference::{HealthMonitor, HealthStatus, HealthStatusListener};
//! use projecthub_infra::{ResilientInferenceClient, Result};
//!
//! struct LogListener;
//!
//! #[async_trait]
//! impl HealthStatusListener for LogListener {
//!     async fn on_health_changed(&self, status: HealthStatus) {
//!         tracing::info!(?status, "inference health changed");
//!     }
//! }
//!
//! # async fn example(client: Arc<ResilientInferenceClient>) -> Result<()> {
//! let settings = projecthub_infra::config::load_or_default()?;
//! let mut monitor = HealthMonitor::from_settings(client, Arc::new(LogListener), &settings.health);
//! monitor.start()?;
//! // ... do work ...
//! monitor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use projecthub_common::duration_millis;
use projecthub_common::resilience::{Clock, SystemClock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::ResilientInferenceClient;
use crate::config::HealthCheckSettings;
use crate::errors::{InfraError, Result};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status of the inference service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Service reachable with its model loaded
    Healthy,

    /// Service failing, timing out, or its health circuit is open
    Unhealthy,

    /// Not checked yet, or the check itself failed for a local reason
    Unknown,
}

impl HealthStatus {
    fn from_check<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Healthy,
            Err(InfraError::Backend(_) | InfraError::Timeout(_) | InfraError::CircuitOpen(_)) => {
                Self::Unhealthy
            }
            Err(_) => Self::Unknown,
        }
    }
}

/// Listener for health status changes
#[async_trait]
pub trait HealthStatusListener: Send + Sync {
    /// Called only when the status actually changes, not on every check
    async fn on_health_changed(&self, status: HealthStatus);
}

/// Background health monitor for the inference service
pub struct HealthMonitor<C: Clock = SystemClock> {
    client: Arc<ResilientInferenceClient<C>>,
    listener: Arc<dyn HealthStatusListener>,
    interval: Duration,
    enabled: bool,
    task_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl<C: Clock> HealthMonitor<C> {
    /// Enabled monitor polling every `interval`
    pub fn new(
        client: Arc<ResilientInferenceClient<C>>,
        listener: Arc<dyn HealthStatusListener>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            listener,
            interval,
            enabled: true,
            task_handle: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Monitor configured by the `[health]` section
    ///
    /// When `enabled` is false, `start` succeeds without spawning anything.
    pub fn from_settings(
        client: Arc<ResilientInferenceClient<C>>,
        listener: Arc<dyn HealthStatusListener>,
        settings: &HealthCheckSettings,
    ) -> Self {
        Self { enabled: settings.enabled, ..Self::new(client, listener, settings.interval) }
    }

    /// Spawn the polling task
    ///
    /// # Errors
    /// Returns `InfraError::Internal` if the monitor is already running.
    pub fn start(&mut self) -> Result<()> {
        if !self.enabled {
            info!("Inference health monitor disabled");
            return Ok(());
        }
        if self.task_handle.is_some() {
            return Err(InfraError::Internal("Health monitor already running".to_string()));
        }

        let cancel = self.cancellation.clone();
        let client = Arc::clone(&self.client);
        let listener = Arc::clone(&self.listener);
        let interval = self.interval;

        info!(
            interval_ms = duration_millis::to_millis(&interval),
            "Starting inference health monitor"
        );

        self.task_handle = Some(tokio::spawn(async move {
            health_worker(client, listener, interval, cancel).await;
        }));
        Ok(())
    }

    /// Signal the task to stop and wait up to 5 seconds for it
    ///
    /// An in-flight check is abandoned. A task that still has not finished
    /// by the deadline is aborted.
    ///
    /// # Errors
    /// Returns `InfraError::Internal` on timeout or if the task panicked.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancellation.cancel();

        if let Some(mut handle) = self.task_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(joined) => {
                    joined.map_err(|e| InfraError::Internal(format!("Task join failed: {e}")))?;
                }
                Err(_) => {
                    handle.abort();
                    return Err(InfraError::Internal(
                        "Health monitor shutdown timeout".to_string(),
                    ));
                }
            }
        }

        info!("Inference health monitor stopped");
        Ok(())
    }

    /// Whether the polling task has been spawned and not yet stopped
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some() && !self.cancellation.is_cancelled()
    }
}

async fn health_worker<C: Clock>(
    client: Arc<ResilientInferenceClient<C>>,
    listener: Arc<dyn HealthStatusListener>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut current_status = HealthStatus::Unknown;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Health monitor worker shutting down");
                break;
            }
            () = tokio::time::sleep(interval) => {
                let result = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Health check abandoned on shutdown");
                        break;
                    }
                    result = client.check_health() => result,
                };
                if let Err(error) = &result {
                    warn!(error = %error, "Inference health check failed");
                }

                let new_status = HealthStatus::from_check(&result);
                if new_status != current_status {
                    info!(
                        previous_status = ?current_status,
                        new_status = ?new_status,
                        "Inference health status changed"
                    );
                    listener.on_health_changed(new_status).await;
                    current_status = new_status;
                }
            }
        }
    }
}
