//! Resilient inference client
//!
//! Every call is validated first, then run as one breaker probe whose body is
//! a full retry run against the backend:
//!
//! ```text
//! validate -> circuit(name).execute( retry.run( backend.call() ) )
//! ```
//!
//! Invalid requests never reach the breaker, so caller mistakes cannot trip a
//! circuit.

use std::sync::Arc;

use futures::future::join_all;
use projecthub_common::resilience::{
    CircuitBreakerRegistry, CircuitConfigOverrides, Clock, RetryConfig, RetryExecutor,
    SystemClock, UsageTracker,
};
use tracing::{debug, instrument};

use super::ports::{BackendError, InferenceBackend};
use super::types::{
    AnswerRequest, AnswerResponse, EmbeddingRequest, EmbeddingResponse, HealthReport,
};
use crate::config::ResilienceSettings;
use crate::errors::{InfraError, Result};

/// Circuit guarding embedding calls
pub const EMBED_CIRCUIT: &str = "inference.embed";
/// Circuit guarding question answering calls
pub const ANSWER_CIRCUIT: &str = "inference.answer";
/// Circuit guarding health checks
pub const HEALTH_CIRCUIT: &str = "inference.health";

pub struct ResilientInferenceClient<C: Clock = SystemClock> {
    backend: Arc<dyn InferenceBackend>,
    registry: Arc<CircuitBreakerRegistry<C>>,
    retry: RetryExecutor,
    health_retry: RetryExecutor,
    health_overrides: CircuitConfigOverrides,
}

impl<C: Clock> std::fmt::Debug for ResilientInferenceClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInferenceClient")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ResilientInferenceClient<SystemClock> {
    /// Build a client, its registry and executors from loaded settings
    pub fn from_settings(
        backend: Arc<dyn InferenceBackend>,
        settings: &ResilienceSettings,
        tracker: Arc<dyn UsageTracker>,
    ) -> Result<Self> {
        settings.validate()?;
        let registry = Arc::new(CircuitBreakerRegistry::new(settings.circuit.clone())?);
        Self::new(backend, registry, settings, tracker)
    }
}

impl<C: Clock> ResilientInferenceClient<C> {
    /// Build a client on top of an existing registry
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<CircuitBreakerRegistry<C>>,
        settings: &ResilienceSettings,
        tracker: Arc<dyn UsageTracker>,
    ) -> Result<Self> {
        let retry = RetryExecutor::new(settings.retry.clone(), Arc::clone(&tracker))?;

        // Health checks answer "is it up right now": one attempt, own deadline.
        let health_config = RetryConfig {
            max_attempts: 1,
            attempt_timeout: settings.health.timeout,
            ..settings.retry.clone()
        };
        let health_retry = RetryExecutor::new(health_config, tracker)?;
        let health_overrides = CircuitConfigOverrides::from(&settings.health.circuit).build()?;

        Ok(Self { backend, registry, retry, health_retry, health_overrides })
    }

    /// Registry holding this client's circuits
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.registry
    }

    /// Embed a batch of texts
    #[instrument(skip(self, request), fields(texts = request.texts.len()))]
    pub async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        request.validate()?;
        let cost = request.approximate_cost();
        let backend = &self.backend;
        let request = &request;

        let response = self
            .registry
            .execute(EMBED_CIRCUIT, || {
                self.retry.run(EMBED_CIRCUIT, cost, || backend.embed(request))
            })
            .await?;

        debug!(model = %response.model, dimensions = response.dimensions, "Embeddings generated");
        Ok(response)
    }

    /// Embed each text with its own request, concurrently.
    ///
    /// Results are returned in input order; one failing item does not fail
    /// the others, though enough of them will open the embed circuit for the
    /// rest.
    pub async fn embed_each(&self, texts: Vec<String>) -> Vec<Result<Vec<f32>>> {
        let calls = texts.into_iter().map(|text| async move {
            let response = self.embed(EmbeddingRequest::single(text)).await?;
            response.embeddings.into_iter().next().ok_or_else(|| {
                InfraError::Backend(BackendError::Malformed(
                    "embedding response contained no vectors".to_string(),
                ))
            })
        });
        join_all(calls).await
    }

    /// Answer a question from context
    #[instrument(skip(self, request), fields(context_items = request.context.len()))]
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        request.validate()?;
        let cost = request.approximate_cost();
        let backend = &self.backend;
        let request = &request;

        let response = self
            .registry
            .execute(ANSWER_CIRCUIT, || {
                self.retry.run(ANSWER_CIRCUIT, cost, || backend.answer(request))
            })
            .await?;
        Ok(response)
    }

    /// Check backend health under the health circuit.
    ///
    /// A report saying the model is not loaded counts as a failure.
    pub async fn check_health(&self) -> Result<HealthReport> {
        let backend = &self.backend;
        let report = self
            .registry
            .execute_with(HEALTH_CIRCUIT, Some(&self.health_overrides), || {
                self.health_retry.run(HEALTH_CIRCUIT, 0, || async {
                    backend.health().await.and_then(|report| {
                        if report.is_ready() {
                            Ok(report)
                        } else {
                            Err(BackendError::Unavailable(format!(
                                "model {} not ready (status: {})",
                                report.model, report.status
                            )))
                        }
                    })
                })
            })
            .await?;
        Ok(report)
    }
}
