//! Adaptive Model Router
//!
//! Picks the model for each request from the catalog given host conditions
//! and each model's smoothed performance, runs the generation, and feeds the
//! outcome back into the performance records.
//!
//! ```text
//! classify ──▶ sample host ──▶ filter ──▶ score ──▶ hint? ──▶ generate
//!                                           │          │          │
//!                                   none left: smallest│   model missing:
//!                                              probe failed:  next-best once
//!                                              log + scored
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::catalog::{smallest, CapabilityClass, ModelDescriptor};
use super::complexity::{task_hint, Complexity, ComplexityThresholds};
use super::performance::{ModelPerformance, PerformanceTracker};
use super::system::{SystemMetricsSource, SystemSnapshot};
use crate::backend::{BackendError, Generation, GenerationRequest, InferenceBackend};
use crate::error::GatewayError;
use crate::request::Request;

// ============================================================================
// Configuration
// ============================================================================

/// Router configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// EMA smoothing factor for performance records
    pub ema_alpha: f64,
    /// Complexity length thresholds
    pub complexity: ComplexityThresholds,
    /// Largest share of available memory a model may need
    pub memory_safety_margin: f64,
    /// Above this CPU utilisation only the lightest model may run
    pub cpu_ceiling_percent: f64,
    /// Affinity multiplier for a matching capability class
    pub affinity_boost: f64,
    /// Affinity multiplier for a mismatched capability class
    pub affinity_penalty: f64,
    /// Smoothed error rate at which a model counts as unhealthy
    pub unhealthy_error_rate: f64,
    /// Per-call backend timeout in milliseconds
    pub call_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            complexity: ComplexityThresholds::default(),
            memory_safety_margin: 0.8,
            cpu_ceiling_percent: 90.0,
            affinity_boost: 1.2,
            affinity_penalty: 0.8,
            unhealthy_error_rate: 0.5,
            call_timeout_ms: 120_000,
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Why a model was chosen
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteReason {
    /// Caller hint accepted after a successful probe
    Hinted,
    /// Highest-scoring candidate
    Scored {
        /// Winning score
        score: f64,
    },
    /// Every model was filtered out
    SmallestFallback,
}

/// Outcome of model selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Chosen model
    pub model: String,
    /// Why it was chosen
    pub reason: RouteReason,
    /// Classified complexity
    pub complexity: Complexity,
    /// Eligible candidates, best first
    pub ranked: Vec<(String, f64)>,
    /// Why a caller hint was not honoured
    pub hint_override: Option<String>,
    /// Host conditions at decision time
    pub system: SystemSnapshot,
}

impl RoutingDecision {
    /// Best-ranked candidate other than `model`
    #[must_use]
    pub fn next_best(&self, model: &str) -> Option<&str> {
        self.ranked
            .iter()
            .map(|(name, _)| name.as_str())
            .find(|name| *name != model)
    }
}

/// A generation together with the decision that produced it
#[derive(Clone, Debug)]
pub struct RoutedGeneration {
    pub generation: Generation,
    pub decision: RoutingDecision,
    /// Request as sent to the backend, reusable for re-invocation
    pub sent: GenerationRequest,
}

/// Router errors
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// Catalog has no models
    EmptyCatalog,
    /// Backend call failed
    Backend {
        /// Model that was called
        model: String,
        /// Underlying failure
        source: BackendError,
    },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCatalog => write!(f, "model catalog is empty"),
            Self::Backend { model, source } => write!(f, "{model}: {source}"),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EmptyCatalog => None,
            Self::Backend { source, .. } => Some(source),
        }
    }
}

impl From<RouterError> for GatewayError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::EmptyCatalog => Self::ModelNotFound("catalog is empty".into()),
            RouterError::Backend { source, .. } => source.into(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Resource-aware model router
pub struct ModelRouter {
    config: RouterConfig,
    catalog: Vec<ModelDescriptor>,
    backend: Arc<dyn InferenceBackend>,
    system: Arc<dyn SystemMetricsSource>,
    performance: PerformanceTracker,
    last_decision: Mutex<Option<RoutingDecision>>,
}

impl fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRouter")
            .field("config", &self.config)
            .field("catalog", &self.catalog.len())
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ModelRouter {
    /// Create a router; performance records start at each model's target latency
    pub fn new(
        config: RouterConfig,
        catalog: Vec<ModelDescriptor>,
        backend: Arc<dyn InferenceBackend>,
        system: Arc<dyn SystemMetricsSource>,
    ) -> Self {
        let performance = PerformanceTracker::new(config.ema_alpha);
        for model in &catalog {
            performance.seed(&model.name, model.target_latency_ms as f64);
        }
        Self {
            config,
            catalog,
            backend,
            system,
            performance,
            last_decision: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &[ModelDescriptor] {
        &self.catalog
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Smallest model in the catalog
    pub fn smallest_model(&self) -> Option<&ModelDescriptor> {
        smallest(&self.catalog)
    }

    pub fn performance(&self, model: &str) -> ModelPerformance {
        self.performance.get(model)
    }

    pub fn performance_records(&self) -> std::collections::BTreeMap<String, ModelPerformance> {
        self.performance.all()
    }

    pub fn last_decision(&self) -> Option<RoutingDecision> {
        self.last_decision.lock().clone()
    }

    fn descriptor(&self, model: &str) -> Option<&ModelDescriptor> {
        self.catalog.iter().find(|m| m.name == model)
    }

    fn affinity(
        &self,
        class: CapabilityClass,
        complexity: Complexity,
        hint: Option<CapabilityClass>,
    ) -> f64 {
        let mut factor = if complexity.preferred().contains(&class) {
            self.config.affinity_boost
        } else {
            self.config.affinity_penalty
        };
        if hint == Some(class) {
            factor *= self.config.affinity_boost;
        }
        factor
    }

    /// Models that fit in memory and are not blocked by CPU saturation
    fn eligible(&self, system: &SystemSnapshot) -> Vec<&ModelDescriptor> {
        let budget = system.memory_available_mb as f64 * self.config.memory_safety_margin;
        let fitting: Vec<&ModelDescriptor> = self
            .catalog
            .iter()
            .filter(|m| m.memory_mb as f64 <= budget)
            .collect();

        if system.cpu_percent > self.config.cpu_ceiling_percent {
            return smallest_ref(&fitting).into_iter().collect();
        }
        fitting
    }

    /// Score eligible models, best first
    fn rank(
        &self,
        eligible: &[&ModelDescriptor],
        complexity: Complexity,
        hint: Option<CapabilityClass>,
        system: &SystemSnapshot,
    ) -> Vec<(String, f64)> {
        let available = system.memory_available_mb.max(1) as f64;
        let mut ranked: Vec<(String, f64)> = eligible
            .iter()
            .map(|m| {
                let perf = self.performance.get(&m.name);
                let headroom = (1.0 - m.memory_mb as f64 / available).max(0.0);
                let score = m.quality
                    * self.affinity(m.capability, complexity, hint)
                    * perf.success_rate
                    * (1.0 - perf.error_rate)
                    * headroom;
                (m.name.clone(), score)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Check whether a hinted model can be used; `Err` carries the reason
    async fn check_hint(&self, hint: &str, ranked: &[(String, f64)]) -> Result<(), String> {
        if self.descriptor(hint).is_none() {
            return Err(GatewayError::ModelNotFound(hint.to_string()).to_string());
        }
        if !ranked.iter().any(|(name, _)| name == hint) {
            return Err("filtered out by memory or CPU limits".to_string());
        }
        if !self
            .performance
            .get(hint)
            .is_healthy(self.config.unhealthy_error_rate)
        {
            return Err("error rate above health threshold".to_string());
        }
        match self.backend.has_model(hint).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(GatewayError::ModelNotFound(hint.to_string()).to_string()),
            Err(e) => Err(format!("probe failed: {e}")),
        }
    }

    /// Choose a model for a request
    ///
    /// # Errors
    ///
    /// [`RouterError::EmptyCatalog`] when there is nothing to choose from.
    pub async fn select(&self, request: &Request) -> Result<RoutingDecision, RouterError> {
        let fallback = self.smallest_model().ok_or(RouterError::EmptyCatalog)?;

        let complexity = self.config.complexity.classify(request.input_chars());
        let hint_class = task_hint(&request.prompt);
        let system = self.system.sample().await;

        let eligible = self.eligible(&system);
        let ranked = self.rank(&eligible, complexity, hint_class, &system);

        let mut hint_override = None;
        if let Some(hint) = request.model_hint.as_deref() {
            match self.check_hint(hint, &ranked).await {
                Ok(()) => {
                    return Ok(self.remember(RoutingDecision {
                        model: hint.to_string(),
                        reason: RouteReason::Hinted,
                        complexity,
                        ranked,
                        hint_override: None,
                        system,
                    }));
                }
                Err(reason) => {
                    tracing::warn!(
                        request_id = %request.id,
                        hint,
                        %reason,
                        "Model hint overridden, using scored selection"
                    );
                    hint_override = Some(reason);
                }
            }
        }

        let (model, reason) = match ranked.first() {
            Some((name, score)) => (name.clone(), RouteReason::Scored { score: *score }),
            None => {
                tracing::warn!(
                    request_id = %request.id,
                    memory_available_mb = system.memory_available_mb,
                    cpu_percent = system.cpu_percent,
                    model = %fallback.name,
                    "No model fits current conditions, using smallest"
                );
                (fallback.name.clone(), RouteReason::SmallestFallback)
            }
        };

        tracing::debug!(
            request_id = %request.id,
            model = %model,
            %complexity,
            candidates = ranked.len(),
            "Model selected"
        );

        Ok(self.remember(RoutingDecision {
            model,
            reason,
            complexity,
            ranked,
            hint_override,
            system,
        }))
    }

    fn remember(&self, decision: RoutingDecision) -> RoutingDecision {
        *self.last_decision.lock() = Some(decision.clone());
        decision
    }

    /// Backend request for `request` on `model`, using the model's defaults
    /// where the request leaves them unset
    pub fn build_request(&self, request: &Request, model: &str) -> GenerationRequest {
        let descriptor = self.descriptor(model);
        let sampling = request
            .sampling
            .or_else(|| descriptor.map(|d| d.defaults))
            .unwrap_or_default();

        GenerationRequest::new(model, request.prompt.clone())
            .with_context(request.context.clone())
            .with_max_tokens(request.max_tokens)
            .with_sampling(sampling)
            .with_hardware(
                descriptor.and_then(|d| d.threads),
                descriptor.and_then(|d| d.gpu_layers),
            )
    }

    /// Run one generation and record the outcome
    ///
    /// # Errors
    ///
    /// The backend failure, with timeouts reported as [`BackendError::Timeout`].
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let deadline = Duration::from_millis(self.config.call_timeout_ms);
        let started = Instant::now();

        let result = match tokio::time::timeout(deadline, self.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(deadline)),
        };

        match &result {
            Ok(_) => self
                .performance
                .record_success(&request.model, started.elapsed().as_secs_f64() * 1000.0),
            Err(e) => {
                tracing::debug!(model = %request.model, error = %e, "Generation failed");
                self.performance.record_failure(&request.model);
            }
        }
        result
    }

    /// Select a model and generate; if the backend reports the model
    /// unavailable, retry once on the next-best candidate
    ///
    /// # Errors
    ///
    /// [`RouterError`] when selection or every attempted call fails.
    pub async fn route(&self, request: &Request) -> Result<RoutedGeneration, RouterError> {
        let decision = self.select(request).await?;
        let sent = self.build_request(request, &decision.model);

        match self.generate(&sent).await {
            Ok(generation) => Ok(RoutedGeneration {
                generation,
                decision,
                sent,
            }),
            Err(e) if e.is_model_unavailable() => {
                let Some(next) = decision.next_best(&decision.model).map(str::to_string) else {
                    return Err(RouterError::Backend {
                        model: decision.model,
                        source: e,
                    });
                };
                tracing::warn!(
                    request_id = %request.id,
                    unavailable = %decision.model,
                    retry = %next,
                    "Model unavailable, retrying on next-best candidate"
                );

                let sent = self.build_request(request, &next);
                match self.generate(&sent).await {
                    Ok(generation) => Ok(RoutedGeneration {
                        generation,
                        decision: RoutingDecision {
                            model: next,
                            ..decision
                        },
                        sent,
                    }),
                    Err(source) => Err(RouterError::Backend {
                        model: next,
                        source,
                    }),
                }
            }
            Err(source) => Err(RouterError::Backend {
                model: decision.model,
                source,
            }),
        }
    }
}

fn smallest_ref<'a>(models: &[&'a ModelDescriptor]) -> Option<&'a ModelDescriptor> {
    models
        .iter()
        .copied()
        .min_by(|a, b| a.memory_mb.cmp(&b.memory_mb).then_with(|| a.name.cmp(&b.name)))
}
