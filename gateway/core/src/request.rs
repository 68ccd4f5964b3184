//! Request and Response types
//!
//! A [`Request`] is immutable once submitted: the dispatcher moves it into
//! its queue ticket and the worker that processes the ticket only lends it
//! out by reference. A [`Response`] is created exactly once per request, or
//! once per cache hit as a copy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;

/// Request identifier, caller-supplied or generated
pub type RequestId = String;

// ============================================================================
// Priority Labels and Caller Tiers
// ============================================================================

/// Caller-declared priority label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLabel {
    /// Interactive, user is waiting
    Critical,
    /// Important but tolerant of a short delay
    High,
    /// Default
    Normal,
    /// Deferrable
    Low,
    /// Batch work, run when idle
    Background,
}

impl PriorityLabel {
    /// All labels, highest first
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Background,
    ];

    /// Base weight before the tier boost
    #[must_use]
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Critical => 100.0,
            Self::High => 75.0,
            Self::Normal => 50.0,
            Self::Low => 25.0,
            Self::Background => 10.0,
        }
    }

    /// Lowercase name used in config, logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

impl Default for PriorityLabel {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for PriorityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLabel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GatewayError::Validation(format!("unknown priority label: {s}")))
    }
}

/// Caller classification controlling quota and priority boost
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerTier {
    /// Highest boost and limits
    Premium,
    /// Paying callers
    Standard,
    /// Default tier
    Basic,
    /// Lowest boost and limits
    Free,
}

impl CallerTier {
    /// All tiers, highest first
    pub const ALL: [Self; 4] = [Self::Premium, Self::Standard, Self::Basic, Self::Free];

    /// Multiplier applied to the label's base weight
    #[must_use]
    pub fn boost(self) -> f64 {
        match self {
            Self::Premium => 1.5,
            Self::Standard => 1.2,
            Self::Basic => 1.0,
            Self::Free => 0.8,
        }
    }

    /// Lowercase name used in config and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Standard => "standard",
            Self::Basic => "basic",
            Self::Free => "free",
        }
    }
}

impl Default for CallerTier {
    fn default() -> Self {
        Self::Basic
    }
}

impl fmt::Display for CallerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallerTier {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GatewayError::Validation(format!("unknown caller tier: {s}")))
    }
}

// ============================================================================
// Sampling Parameters
// ============================================================================

/// Sampling parameters forwarded to the backend
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature (0.0-2.0)
    pub temperature: f32,
    /// Nucleus sampling cutoff (0.0-1.0]
    pub top_p: f32,
    /// Top-k cutoff (0 = backend default)
    pub top_k: u32,
    /// Repetition penalty (> 0)
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}

impl SamplingParams {
    fn validate(&self) -> Result<(), GatewayError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::Validation(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(GatewayError::Validation(format!(
                "top_p {} outside (0.0, 1.0]",
                self.top_p
            )));
        }
        if self.repeat_penalty <= 0.0 || !self.repeat_penalty.is_finite() {
            return Err(GatewayError::Validation(format!(
                "repeat_penalty {} must be positive",
                self.repeat_penalty
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Request
// ============================================================================

/// An inference request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier
    pub id: RequestId,
    /// Prompt text
    pub prompt: String,
    /// Retrieval context supplied by the caller
    pub context: Option<String>,
    /// Preferred model
    pub model_hint: Option<String>,
    /// Priority label
    pub priority: PriorityLabel,
    /// Maximum output tokens (0 = backend default)
    pub max_tokens: u32,
    /// Sampling parameters; `None` uses the chosen model's defaults
    pub sampling: Option<SamplingParams>,
    /// Caller identity
    pub caller: String,
    /// Caller tier
    pub tier: CallerTier,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Whether to enrich the prompt with retrieved passages
    pub enrich: bool,
}

impl Request {
    /// Create a request with a generated id and default settings
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            context: None,
            model_hint: None,
            priority: PriorityLabel::Normal,
            max_tokens: 0,
            sampling: None,
            caller: "anonymous".to_string(),
            tier: CallerTier::Basic,
            created_at: Utc::now(),
            enrich: false,
        }
    }

    /// Use a caller-supplied id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach retrieval context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Hint a model
    #[must_use]
    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    /// Set priority label
    #[must_use]
    pub fn with_priority(mut self, priority: PriorityLabel) -> Self {
        self.priority = priority;
        self
    }

    /// Set maximum output tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling parameters
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Set caller identity and tier
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>, tier: CallerTier) -> Self {
        self.caller = caller.into();
        self.tier = tier;
        self
    }

    /// Request retrieval enrichment
    #[must_use]
    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    /// Combined prompt and context length in characters
    #[must_use]
    pub fn input_chars(&self) -> usize {
        self.prompt.chars().count() + self.context.as_deref().map_or(0, |c| c.chars().count())
    }

    /// Check the request is well-formed
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] naming the first offending field.
    pub fn validate(&self, max_prompt_chars: usize) -> Result<(), GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Validation("id must not be empty".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(GatewayError::Validation("prompt must not be empty".into()));
        }
        if self.caller.trim().is_empty() {
            return Err(GatewayError::Validation("caller must not be empty".into()));
        }
        let chars = self.input_chars();
        if chars > max_prompt_chars {
            return Err(GatewayError::Validation(format!(
                "prompt and context are {chars} characters, limit is {max_prompt_chars}"
            )));
        }
        if matches!(&self.model_hint, Some(hint) if hint.trim().is_empty()) {
            return Err(GatewayError::Validation("model hint must not be blank".into()));
        }
        match &self.sampling {
            Some(sampling) => sampling.validate(),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Terminal result for a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Originating request
    pub request_id: RequestId,
    /// Generated text (empty on error)
    pub text: String,
    /// Model that produced the text
    pub model: String,
    /// Tokens generated
    pub tokens_used: u32,
    /// Generation throughput
    pub tokens_per_second: f64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Whether retrieved passages were spliced into the prompt
    pub enriched: bool,
    /// Whether this copy came from the cache
    pub cache_hit: bool,
    /// Error marker; set when every attempt failed
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Response {
    /// Synthesize an error response
    pub fn failure(request_id: impl Into<String>, model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            text: String::new(),
            model: model.into(),
            tokens_used: 0,
            tokens_per_second: 0.0,
            duration_ms: 0,
            enriched: false,
            cache_hit: false,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    /// Whether this response carries an error marker
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Copy for another request served from cache
    #[must_use]
    pub fn cached_copy(&self, request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            cache_hit: true,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}
