//! Inference backend port
//!
//! Implemented by the HTTP adapter in the application and by fakes in tests.
//! Implementations make exactly one network call per method invocation;
//! retrying and circuit breaking happen in
//! [`ResilientInferenceClient`](super::ResilientInferenceClient).

use async_trait::async_trait;
use thiserror::Error;

use super::types::{AnswerRequest, AnswerResponse, EmbeddingRequest, EmbeddingResponse, HealthReport};

/// Failure reported by a backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The service could not be reached or is not ready
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    /// The service answered with an error status
    #[error("inference backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The service answered with a body that could not be understood
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

/// Port for the inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Embed every text of the request
    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, BackendError>;

    /// Answer a question from the supplied context
    async fn answer(&self, request: &AnswerRequest) -> Result<AnswerResponse, BackendError>;

    /// Report service health
    async fn health(&self) -> Result<HealthReport, BackendError>;
}
