//! Inference request and response payloads

use serde::{Deserialize, Serialize};

use crate::errors::{InfraError, Result};

/// Upper bound on texts in one embedding request
pub const MAX_TEXTS_PER_REQUEST: usize = 100;

/// Rough token estimate used as the approximate cost of a call
pub fn estimate_tokens<'a>(texts: impl IntoIterator<Item = &'a str>) -> u64 {
    texts
        .into_iter()
        .map(|text| u64::try_from(text.chars().count()).unwrap_or(u64::MAX).div_ceil(4))
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_normalize() -> bool {
    true
}

impl EmbeddingRequest {
    pub fn new(texts: Vec<String>) -> Self {
        Self { texts, normalize: true }
    }

    pub fn single(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Reject requests the service would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.texts.is_empty() {
            return Err(InfraError::InvalidInput("No texts provided".to_string()));
        }
        if self.texts.len() > MAX_TEXTS_PER_REQUEST {
            return Err(InfraError::InvalidInput(format!(
                "Maximum {MAX_TEXTS_PER_REQUEST} texts per request, got {}",
                self.texts.len()
            )));
        }
        Ok(())
    }

    pub fn approximate_cost(&self) -> u64 {
        estimate_tokens(self.texts.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub context: Vec<String>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, context: Vec<String>) -> Self {
        Self { question: question.into(), context }
    }

    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(InfraError::InvalidInput("Question must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn approximate_cost(&self) -> u64 {
        estimate_tokens(
            std::iter::once(self.question.as_str()).chain(self.context.iter().map(String::as_str)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub model: String,
}

/// Body of the service's health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model: String,
    pub model_loaded: bool,
}

impl HealthReport {
    /// Whether the service can take inference traffic
    pub fn is_ready(&self) -> bool {
        self.status == "healthy" && self.model_loaded
    }
}
