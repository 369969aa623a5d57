//! Shared fakes for infra integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use projecthub_infra::config::ResilienceSettings;
use projecthub_infra::inference::{
    AnswerRequest, AnswerResponse, BackendError, EmbeddingRequest, EmbeddingResponse,
    HealthReport, InferenceBackend,
};
use projecthub_common::resilience::{CircuitConfig, RetryConfig};

pub const MODEL: &str = "all-MiniLM-L6-v2";
pub const DIMENSIONS: usize = 4;

/// Backend whose failures are scripted by the test
#[derive(Default)]
pub struct ScriptedBackend {
    /// Calls that fail before calls start succeeding
    pub failures_before_success: AtomicU32,
    /// Fail every call
    pub down: AtomicBool,
    /// Never resolve
    pub hang: AtomicBool,
    pub model_loaded: AtomicBool,
    pub calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn healthy() -> Self {
        let backend = Self::default();
        backend.model_loaded.store(true, Ordering::SeqCst);
        backend
    }

    pub fn failing_first(failures: u32) -> Self {
        let backend = Self::healthy();
        backend.failures_before_success.store(failures, Ordering::SeqCst);
        backend
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Status { status: 503, message: "overloaded".to_string() });
        }
        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, BackendError> {
        self.gate().await?;
        let embeddings = request
            .texts
            .iter()
            .map(|text| vec![text.chars().count() as f32; DIMENSIONS])
            .collect();
        Ok(EmbeddingResponse { embeddings, model: MODEL.to_string(), dimensions: DIMENSIONS })
    }

    async fn answer(&self, request: &AnswerRequest) -> Result<AnswerResponse, BackendError> {
        self.gate().await?;
        Ok(AnswerResponse {
            answer: format!("{} ({} sources)", request.question, request.context.len()),
            model: MODEL.to_string(),
        })
    }

    async fn health(&self) -> Result<HealthReport, BackendError> {
        self.gate().await?;
        Ok(HealthReport {
            status: "healthy".to_string(),
            model: MODEL.to_string(),
            model_loaded: self.model_loaded.load(Ordering::SeqCst),
        })
    }
}

/// Small thresholds and delays so tests run on paused time quickly
pub fn test_settings() -> ResilienceSettings {
    let mut settings = ResilienceSettings::default();
    settings.circuit = CircuitConfig::builder()
        .failure_threshold(2)
        .recovery_timeout(Duration::from_secs(5))
        .build()
        .expect("valid circuit config");
    settings.retry = RetryConfig::builder()
        .max_attempts(3)
        .exponential_backoff(Duration::from_millis(10))
        .attempt_timeout(Duration::from_millis(50))
        .build()
        .expect("valid retry config");
    settings.health.timeout = Duration::from_millis(50);
    settings
}
