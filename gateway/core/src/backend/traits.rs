//! Inference Backend Traits
//!
//! Implementations handle provider-specific details (API formats, transport,
//! error bodies) and report failures through [`BackendError`] so the router
//! can tell an unknown model apart from an unreachable server.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::request::SamplingParams;

/// A single generation call
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// Model to run
    pub model: String,
    /// Prompt text (already enriched if applicable)
    pub prompt: String,
    /// Context prepended to the prompt
    pub context: Option<String>,
    /// Maximum output tokens (0 = backend default)
    pub max_tokens: u32,
    /// Sampling parameters
    pub sampling: SamplingParams,
    /// CPU thread hint
    pub threads: Option<u32>,
    /// GPU layer offload hint
    pub gpu_layers: Option<u32>,
}

impl GenerationRequest {
    /// Create a request for a model with default sampling
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            context: None,
            max_tokens: 0,
            sampling: SamplingParams::default(),
            threads: None,
            gpu_layers: None,
        }
    }

    /// Set context
    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling parameters
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set hardware hints
    #[must_use]
    pub fn with_hardware(mut self, threads: Option<u32>, gpu_layers: Option<u32>) -> Self {
        self.threads = threads;
        self.gpu_layers = gpu_layers;
        self
    }
}

/// Output of a generation call
#[derive(Clone, Debug, PartialEq)]
pub struct Generation {
    /// Generated text
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Tokens generated
    pub tokens_used: u32,
    /// Backend-reported duration in milliseconds
    pub duration_ms: u64,
}

impl Generation {
    /// Tokens per second, zero when no duration was reported
    #[must_use]
    pub fn tokens_per_second(&self) -> f64 {
        if self.duration_ms == 0 {
            0.0
        } else {
            f64::from(self.tokens_used) * 1000.0 / self.duration_ms as f64
        }
    }
}

/// Backend call failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Connection refused, DNS failure, reset
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend does not serve this model
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The call exceeded its deadline
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status
    #[error("backend returned {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Body could not be decoded
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether the failure means the chosen model cannot serve right now
    #[must_use]
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::ModelNotFound(_))
    }
}

/// Inference backend trait
///
/// Implement this trait to put the gateway in front of a different server.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Run one generation
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError>;

    /// Names of the models the backend serves
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Lightweight availability probe for a single model
    async fn has_model(&self, model: &str) -> Result<bool, BackendError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == model))
    }
}
