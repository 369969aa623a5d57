//! Circuit maintenance service
//!
//! Owns the background sweeper that clears stale failure counts from CLOSED
//! circuits, with the same start/stop lifecycle as the health monitor.

use std::sync::Arc;
use std::time::Duration;

use projecthub_common::duration_millis;
use projecthub_common::resilience::{CircuitBreakerRegistry, Clock, SystemClock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ResilienceSettings;
use crate::errors::{InfraError, Result};

pub struct MaintenanceService<C: Clock = SystemClock> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    sweep_interval: Duration,
    task_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl<C: Clock> MaintenanceService<C> {
    pub fn new(registry: Arc<CircuitBreakerRegistry<C>>, sweep_interval: Duration) -> Self {
        Self { registry, sweep_interval, task_handle: None, cancellation: CancellationToken::new() }
    }

    /// Sweep every `sweep_interval` from the loaded settings
    pub fn from_settings(
        registry: Arc<CircuitBreakerRegistry<C>>,
        settings: &ResilienceSettings,
    ) -> Self {
        Self::new(registry, settings.sweep_interval)
    }

    /// Start sweeping
    ///
    /// # Errors
    /// Returns `InfraError::Internal` if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.task_handle.is_some() {
            return Err(InfraError::Internal("Maintenance service already running".to_string()));
        }

        info!(
            sweep_interval_ms = duration_millis::to_millis(&self.sweep_interval),
            "Starting circuit maintenance"
        );
        self.task_handle =
            Some(self.registry.spawn_sweeper(self.sweep_interval, self.cancellation.clone()));
        Ok(())
    }

    /// Stop sweeping and wait up to 5 seconds for the task
    pub async fn stop(&mut self) -> Result<()> {
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .map_err(|_| InfraError::Internal("Maintenance shutdown timeout".to_string()))?
                .map_err(|e| InfraError::Internal(format!("Task join failed: {e}")))?;
        }

        info!("Circuit maintenance stopped");
        Ok(())
    }

    /// Whether the sweeper has been spawned and not yet stopped
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some() && !self.cancellation.is_cancelled()
    }
}
