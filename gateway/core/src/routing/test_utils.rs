//! Scripted backend for tests
//!
//! Serves a configurable set of models without any real inference. Calls are
//! counted per model, concurrency is tracked, and individual models can be
//! made to fail or disappear to exercise fallback paths.
//!
//! ```ignore
//! use gateway_core::routing::test_utils::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new(&["tiny", "huge"]);
//! backend.remove_model("huge");
//! // ... run requests ...
//! assert_eq!(backend.request_count("tiny"), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendError, Generation, GenerationRequest, InferenceBackend};

/// Mock backend with per-model failure injection
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    models: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    latency: Duration,
    down: Mutex<bool>,
    request_counts: Mutex<HashMap<String, usize>>,
    prompts: Mutex<Vec<String>>,
    generates: AtomicUsize,
    probes: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    /// Backend serving `models`
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: Mutex::new(models.iter().map(|m| (*m).to_string()).collect()),
            ..Self::default()
        }
    }

    /// Delay every generation by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls to `model` fail with a transport error
    pub fn fail_model(&self, model: &str) {
        self.failing.lock().insert(model.to_string());
    }

    /// Calls to `model` fail with `ModelNotFound`
    pub fn remove_model(&self, model: &str) {
        self.models.lock().remove(model);
    }

    /// Every call fails as if the backend were unreachable
    pub fn set_down(&self, down: bool) {
        *self.down.lock() = down;
    }

    /// Generation calls for `model`, including failed ones
    pub fn request_count(&self, model: &str) -> usize {
        self.request_counts.lock().get(model).copied().unwrap_or(0)
    }

    /// All generation calls
    pub fn generate_count(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    /// `has_model` probes
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous generations observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Prompts in the order generations started
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        !*self.down.lock()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        *self
            .request_counts
            .lock()
            .entry(request.model.clone())
            .or_insert(0) += 1;
        self.prompts.lock().push(request.prompt.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if *self.down.lock() {
            return Err(BackendError::Unreachable("scripted backend is down".into()));
        }
        if !self.models.lock().contains(&request.model) {
            return Err(BackendError::ModelNotFound(request.model.clone()));
        }
        if self.failing.lock().contains(&request.model) {
            return Err(BackendError::Unreachable(format!(
                "{} failed (scripted)",
                request.model
            )));
        }

        let text = format!("[{}] {}", request.model, request.prompt);
        Ok(Generation {
            tokens_used: u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX),
            text,
            model: request.model.clone(),
            duration_ms: u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        if *self.down.lock() {
            return Err(BackendError::Unreachable("scripted backend is down".into()));
        }
        let mut models: Vec<String> = self.models.lock().iter().cloned().collect();
        models.sort();
        Ok(models)
    }

    async fn has_model(&self, model: &str) -> Result<bool, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.list_models().await?.iter().any(|m| m == model))
    }
}
