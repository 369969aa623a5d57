//! Inference service access with circuit breaking and retries
//!
//! - [`types`]: request and response payloads
//! - [`ports`]: the backend port and its error type
//! - [`client`]: the resilient client wrapping a backend
//! - [`health`]: background health monitor

pub mod client;
pub mod health;
pub mod ports;
pub mod types;

pub use client::{
    ResilientInferenceClient, ANSWER_CIRCUIT, EMBED_CIRCUIT, HEALTH_CIRCUIT,
};
pub use health::{HealthMonitor, HealthStatus, HealthStatusListener};
pub use ports::{BackendError, InferenceBackend};
pub use types::{
    estimate_tokens, AnswerRequest, AnswerResponse, EmbeddingRequest, EmbeddingResponse,
    HealthReport, MAX_TEXTS_PER_REQUEST,
};
