//! Centralized Dispatcher
//!
//! The only component callers talk to. It owns the priority queue and the
//! concurrency gate, and composes the prioritizer, router, cache, monitor and
//! retriever.
//!
//! ```text
//! submit ──▶ validate ──▶ admit (quota) ──▶ queue
//!                                             │
//!            consumer: acquire gate ──▶ pop highest
//!                                             │
//!         ┌───────────── in flight? ◀─────────┘
//!         │ yes: follow leader        │ no
//!         ▼                           ▼
//!     copy of leader's         cache hit? ──yes──▶ copy
//!        response                     │ no
//!                                     ▼
//!                      route + generate ──fail──▶ smallest model (once)
//!                                     │                  │ fail
//!                              enrich (optional)    error Response
//!                                     ▼
//!                     release gate, cache, publish, callbacks
//! ```
//!
//! A caller's `await_response` timeout only detaches that caller. The work
//! continues and its result is cached.

mod enrichment;
mod queue;
mod results;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::{Generation, GenerationRequest, InferenceBackend};
use crate::cache::{
    fingerprint, retrieval_key, CacheClass, CacheStats, DistributedCache, SharedStore,
};
use crate::config::GatewayConfig;
use crate::error::{AwaitError, GatewayError};
use crate::monitor::{Gauge, HealthStatus, MetricsSnapshot, Monitor};
use crate::prioritizer::{Prioritizer, PrioritizerStats};
use crate::request::{Request, RequestId, Response};
use crate::routing::{ModelRouter, RouterError, SystemMetricsSource};

pub use enrichment::{splice, EnrichmentConfig, NoopRetriever, RetrievalError, Retriever};
pub use queue::{Ticket, TicketQueue};
pub use results::{ResultTable, Subscription};

// ============================================================================
// Configuration
// ============================================================================

/// Dispatcher configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum concurrent backend calls
    pub gate_capacity: usize,
    /// Maximum prompt plus context length in characters
    pub max_prompt_chars: usize,
    /// Per-call backend timeout in milliseconds
    pub call_timeout_ms: u64,
    /// How long completed results stay awaitable
    pub result_retention_secs: u64,
    /// Period of the maintenance task
    pub maintenance_interval_secs: u64,
    /// How long shutdown waits for in-flight work
    pub drain_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            gate_capacity: 4,
            max_prompt_chars: 32_000,
            call_timeout_ms: 120_000,
            result_retention_secs: 600,
            maintenance_interval_secs: 300,
            drain_timeout_secs: 30,
        }
    }
}

/// Collaborators the dispatcher composes
pub struct Components {
    pub cache: Arc<DistributedCache>,
    pub prioritizer: Arc<Prioritizer>,
    pub router: Arc<ModelRouter>,
    pub monitor: Arc<Monitor>,
    pub retriever: Arc<dyn Retriever>,
}

/// Result of one maintenance pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub snapshot: MetricsSnapshot,
    pub pruned_callers: usize,
    pub pruned_results: usize,
    pub purged_cache_entries: usize,
}

type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

#[derive(Debug)]
struct Follower {
    id: RequestId,
    caller: String,
    enqueued_at: Instant,
}

/// Decrements a gauge when dropped
struct GaugeGuard<'a>(&'a Gauge);

impl<'a> GaugeGuard<'a> {
    fn inc(gauge: &'a Gauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Owns a single-flight slot for the leader of a fingerprint
///
/// Dropped without `release` (the worker panicked or was torn down), it
/// frees the slot and fails the leader and every follower so nobody waits
/// on a result that will never come.
struct FlightGuard<'a> {
    inner: &'a Inner,
    fingerprint: String,
    leader: Option<Follower>,
}

impl FlightGuard<'_> {
    /// Free the slot and hand back the followers that joined it
    fn release(mut self) -> Vec<Follower> {
        self.leader = None;
        self.take_followers()
    }

    fn take_followers(&self) -> Vec<Follower> {
        self.inner
            .in_progress
            .remove(&self.fingerprint)
            .map(|(_, followers)| followers)
            .unwrap_or_default()
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let Some(leader) = self.leader.take() else {
            return;
        };
        let followers = self.take_followers();
        tracing::error!(
            request_id = %leader.id,
            followers = followers.len(),
            "Request processing aborted, failing waiters"
        );
        for waiter in followers.into_iter().chain(std::iter::once(leader)) {
            let response = Response::failure(&waiter.id, "", "request processing aborted");
            self.inner.finish(&waiter.caller, response, waiter.enqueued_at);
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Priority dispatcher in front of the inference backend
pub struct Dispatcher {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

struct Inner {
    config: DispatcherConfig,
    enrichment: EnrichmentConfig,
    queue: TicketQueue,
    gate: Arc<Semaphore>,
    results: ResultTable,
    in_progress: DashMap<String, Vec<Follower>>,
    callbacks: Mutex<HashMap<RequestId, Callback>>,
    cache: Arc<DistributedCache>,
    prioritizer: Arc<Prioritizer>,
    router: Arc<ModelRouter>,
    monitor: Arc<Monitor>,
    retriever: Arc<dyn Retriever>,
    workers: TaskTracker,
    /// Stops the consumer and maintenance loops
    shutdown: CancellationToken,
    /// Aborts in-flight workers after the drain deadline
    abort: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher; call [`Dispatcher::start`] to begin processing
    pub fn new(config: DispatcherConfig, enrichment: EnrichmentConfig, components: Components) -> Self {
        let gate = Arc::new(Semaphore::new(config.gate_capacity.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                enrichment,
                queue: TicketQueue::new(),
                gate,
                results: ResultTable::new(),
                in_progress: DashMap::new(),
                callbacks: Mutex::new(HashMap::new()),
                cache: components.cache,
                prioritizer: components.prioritizer,
                router: components.router,
                monitor: components.monitor,
                retriever: components.retriever,
                workers: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                abort: CancellationToken::new(),
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Wire every component from one configuration
    pub fn from_config(
        config: &GatewayConfig,
        backend: Arc<dyn InferenceBackend>,
        system: Arc<dyn SystemMetricsSource>,
        shared: Arc<dyn SharedStore>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        let router = ModelRouter::new(config.router_config(), config.models.clone(), backend, system);
        Self::new(
            config.dispatcher.clone(),
            config.enrichment.clone(),
            Components {
                cache: Arc::new(DistributedCache::new(config.cache.clone(), shared)),
                prioritizer: Arc::new(Prioritizer::new(config.prioritizer_config())),
                router: Arc::new(router),
                monitor: Arc::new(Monitor::new(config.monitor.clone())),
                retriever,
            },
        )
    }

    /// Spawn the consumer loop and the maintenance task
    ///
    /// Must be called from within a Tokio runtime. Later calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            gate_capacity = self.inner.config.gate_capacity,
            backend = self.inner.router.backend().name(),
            "Dispatcher started"
        );
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(&self.inner).run_consumer()));
        tasks.push(tokio::spawn(Arc::clone(&self.inner).run_maintenance()));
    }

    /// Queue a request and return its id without waiting for processing
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] for malformed requests or a reused id,
    /// [`GatewayError::QuotaExceeded`] when the caller is over quota. Nothing
    /// is queued in either case.
    pub fn submit(&self, request: Request) -> Result<RequestId, GatewayError> {
        self.inner.enqueue(request, None)
    }

    /// Like [`Dispatcher::submit`], additionally invoking `callback` with the
    /// terminal response
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::submit`]; the callback is dropped uncalled.
    pub fn submit_with_callback<F>(&self, request: Request, callback: F) -> Result<RequestId, GatewayError>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        self.inner.enqueue(request, Some(Box::new(callback)))
    }

    /// Wait for a request's response
    ///
    /// `timeout` defaults to the timeout of the request's priority label.
    /// Expiry detaches the caller only; the request keeps running.
    ///
    /// # Errors
    ///
    /// [`AwaitError::TimedOut`] on expiry, [`AwaitError::UnknownRequest`]
    /// when the id was never submitted or has been pruned.
    pub async fn await_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Response, AwaitError> {
        let inner = &self.inner;
        let Some(mut sub) = inner.results.subscribe(request_id) else {
            return Err(AwaitError::UnknownRequest(request_id.to_string()));
        };
        let wait = timeout.unwrap_or(sub.timeout);

        let ready = sub.rx.borrow().clone();
        if let Some(response) = ready {
            return Ok(response);
        }
        if let Some(cached) = inner
            .cache
            .get::<Response>(CacheClass::Inference, &sub.fingerprint)
            .await
        {
            return Ok(cached.cached_copy(request_id));
        }

        // The watch::Ref borrows `sub`; clone out of it before `sub` drops
        let outcome = match tokio::time::timeout(wait, sub.rx.wait_for(Option::is_some)).await {
            Ok(Ok(response)) => response.clone(),
            Ok(Err(_)) => None,
            Err(_) => return Err(AwaitError::TimedOut(wait)),
        };
        outcome.ok_or_else(|| AwaitError::UnknownRequest(request_id.to_string()))
    }

    /// Submit and wait in one call
    ///
    /// # Errors
    ///
    /// Submission errors, or [`GatewayError::Timeout`] when the wait expires.
    pub async fn ask(&self, request: Request, timeout: Option<Duration>) -> Result<Response, GatewayError> {
        let id = self.submit(request)?;
        self.await_response(&id, timeout).await.map_err(|e| match e {
            AwaitError::TimedOut(after) => GatewayError::Timeout(after),
            AwaitError::UnknownRequest(id) => GatewayError::Validation(format!("unknown request id {id}")),
        })
    }

    /// Current monitor snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.monitor.snapshot()
    }

    pub fn health_check(&self) -> HealthStatus {
        self.inner.monitor.health()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn prioritizer_stats(&self) -> PrioritizerStats {
        self.inner.prioritizer.stats()
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.inner.router
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.inner.monitor
    }

    /// Tickets waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Free slots on the concurrency gate
    ///
    /// The consumer takes a permit before it pops, so an idle running
    /// dispatcher reports one less than the capacity.
    pub fn available_permits(&self) -> usize {
        self.inner.gate.available_permits()
    }

    /// Run one maintenance pass now
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.maintain().await
    }

    /// Stop processing and drain
    ///
    /// The consumer stops dequeuing and the gate is closed. In-flight work
    /// gets the drain timeout to finish; after that it is cancelled and its
    /// callers receive error responses. Tickets still queued are completed
    /// with error responses as well.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        tracing::info!(
            in_flight = inner.workers.len(),
            queued = inner.queue.len(),
            "Dispatcher shutting down"
        );
        inner.shutdown.cancel();
        inner.gate.close();
        inner.workers.close();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Dispatcher task panicked");
            }
        }

        let drain = Duration::from_secs(inner.config.drain_timeout_secs);
        if tokio::time::timeout(drain, inner.workers.wait()).await.is_err() {
            tracing::warn!(
                remaining = inner.workers.len(),
                "Drain deadline passed, cancelling in-flight requests"
            );
            inner.abort.cancel();
            inner.workers.wait().await;
        }

        while let Some(ticket) = inner.queue.try_pop() {
            inner.monitor.queued().dec();
            let response = Response::failure(
                &ticket.request.id,
                "",
                "dispatcher shut down before the request was processed",
            );
            inner.finish(&ticket.request.caller, response, ticket.enqueued_at);
        }
        tracing::info!("Dispatcher stopped");
    }
}

impl Inner {
    fn enqueue(&self, request: Request, callback: Option<Callback>) -> Result<RequestId, GatewayError> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::BackendUnavailable("dispatcher is shut down".into()));
        }
        request.validate(self.config.max_prompt_chars)?;

        let fingerprint = fingerprint(&request);
        let timeout = self.prioritizer.timeout_for(request.priority);
        if !self.results.register(&request.id, &fingerprint, timeout) {
            return Err(GatewayError::Validation(format!(
                "request id {} is already in use",
                request.id
            )));
        }

        let admission = match self.prioritizer.admit(&request) {
            Ok(admission) => admission,
            Err(e) => {
                self.results.remove(&request.id);
                return Err(e);
            }
        };

        if let Some(callback) = callback {
            self.callbacks.lock().insert(request.id.clone(), callback);
        }
        self.monitor.record_request();
        self.monitor.queued().inc();

        let id = request.id.clone();
        tracing::debug!(
            request_id = %id,
            caller = %request.caller,
            priority = admission.priority,
            label = %request.priority,
            "Request queued"
        );
        self.queue.push(Ticket {
            priority: admission.priority,
            seq: self.queue.next_seq(),
            fingerprint,
            request,
            enqueued_at: Instant::now(),
            timeout: admission.timeout,
        });
        Ok(id)
    }

    async fn run_consumer(self: Arc<Self>) {
        loop {
            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let ticket = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                ticket = self.queue.pop() => ticket,
            };

            let inner = Arc::clone(&self);
            self.workers.spawn(async move { inner.process(ticket, permit).await });
        }
        tracing::debug!("Dispatcher consumer stopped");
    }

    async fn run_maintenance(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.maintenance_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.maintain().await;
                }
            }
        }
    }

    async fn maintain(&self) -> MaintenanceReport {
        let snapshot = self.monitor.record_snapshot();
        let pruned_callers = self.prioritizer.prune_history();
        let pruned_results = self.results.prune(
            Duration::from_secs(self.config.result_retention_secs),
            Instant::now(),
        );
        let purged_cache_entries = self.cache.purge_expired().await;
        tracing::debug!(
            health = %snapshot.health,
            pruned_callers,
            pruned_results,
            purged_cache_entries,
            "Maintenance pass"
        );
        MaintenanceReport {
            snapshot,
            pruned_callers,
            pruned_results,
            purged_cache_entries,
        }
    }

    async fn process(&self, ticket: Ticket, permit: OwnedSemaphorePermit) {
        self.monitor.queued().dec();
        let Ticket {
            request,
            fingerprint,
            enqueued_at,
            ..
        } = ticket;

        match self.in_progress.entry(fingerprint.clone()) {
            Entry::Occupied(mut leader) => {
                leader.get_mut().push(Follower {
                    id: request.id.clone(),
                    caller: request.caller.clone(),
                    enqueued_at,
                });
                tracing::debug!(request_id = %request.id, "Joined identical in-flight request");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
            }
        }
        let flight = FlightGuard {
            inner: self,
            fingerprint: fingerprint.clone(),
            leader: Some(Follower {
                id: request.id.clone(),
                caller: request.caller.clone(),
                enqueued_at,
            }),
        };

        let cached = self
            .cache
            .get::<Response>(CacheClass::Inference, &fingerprint)
            .await;
        let response = if let Some(cached) = cached {
            drop(permit);
            self.monitor.record_cache_hit();
            tracing::debug!(request_id = %request.id, "Cache hit");
            cached.cached_copy(&request.id)
        } else {
            tokio::select! {
                response = self.infer(&request, permit) => response,
                () = self.abort.cancelled() => Response::failure(
                    &request.id,
                    "",
                    "dispatcher shut down before the request completed",
                ),
            }
        };

        if !response.is_error() && !response.cache_hit {
            self.cache
                .set(CacheClass::Inference, &fingerprint, &response)
                .await;
        }

        // After the cache write so later duplicates hit the cache
        let followers = flight.release();

        for follower in followers {
            let copy = if response.is_error() {
                Response {
                    request_id: follower.id.clone(),
                    ..response.clone()
                }
            } else {
                self.monitor.record_cache_hit();
                response.cached_copy(&follower.id)
            };
            self.finish(&follower.caller, copy, follower.enqueued_at);
        }
        self.finish(&request.caller, response, enqueued_at);
    }

    async fn infer(&self, request: &Request, permit: OwnedSemaphorePermit) -> Response {
        let _in_flight = GaugeGuard::inc(self.monitor.in_flight());
        let started = Instant::now();

        let outcome = match self.router.route(request).await {
            Ok(routed) => Ok((routed.generation, routed.sent)),
            Err(err) => self.fallback(request, err).await,
        };

        let response = match outcome {
            Ok((generation, sent)) => {
                let (generation, enriched) = if request.enrich {
                    self.enrich(request, generation, sent).await
                } else {
                    (generation, false)
                };
                Response {
                    request_id: request.id.clone(),
                    tokens_per_second: generation.tokens_per_second(),
                    text: generation.text,
                    model: generation.model,
                    tokens_used: generation.tokens_used,
                    duration_ms: elapsed_ms(started),
                    enriched,
                    cache_hit: false,
                    error: None,
                    created_at: Utc::now(),
                }
            }
            Err((model, err)) => {
                tracing::error!(
                    request_id = %request.id,
                    model = %model,
                    error = %err,
                    "Inference failed after fallback, returning error response"
                );
                Response {
                    duration_ms: elapsed_ms(started),
                    ..Response::failure(&request.id, model, err.to_string())
                }
            }
        };

        drop(permit);
        response
    }

    /// One attempt on the smallest model after any routed failure
    async fn fallback(
        &self,
        request: &Request,
        err: RouterError,
    ) -> Result<(Generation, GenerationRequest), (String, GatewayError)> {
        let Some(smallest) = self.router.smallest_model().map(|m| m.name.clone()) else {
            return Err((String::new(), err.into()));
        };
        tracing::warn!(
            request_id = %request.id,
            error = %err,
            fallback = %smallest,
            "Inference failed, trying fallback model"
        );
        self.monitor.record_fallback();

        let sent = self.router.build_request(request, &smallest);
        match self.router.generate(&sent).await {
            Ok(generation) => Ok((generation, sent)),
            Err(e) => Err((smallest, e.into())),
        }
    }

    /// Re-run once with retrieved passages spliced in; keeps the first answer
    /// when retrieval finds nothing or the second call fails
    async fn enrich(
        &self,
        request: &Request,
        generation: Generation,
        mut sent: GenerationRequest,
    ) -> (Generation, bool) {
        let passages = self.retrieve(&request.prompt).await;
        if passages.is_empty() {
            return (generation, false);
        }

        sent.prompt = splice(&request.prompt, &passages);
        match self.router.generate(&sent).await {
            Ok(enriched) => {
                self.monitor.record_enrichment();
                (enriched, true)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request.id,
                    error = %e,
                    "Enriched re-run failed, keeping unenriched answer"
                );
                (generation, false)
            }
        }
    }

    async fn retrieve(&self, query: &str) -> Vec<String> {
        let limit = self.enrichment.top_k;
        if limit == 0 {
            return Vec::new();
        }
        let key = retrieval_key(query, limit);
        if let Some(passages) = self.cache.get::<Vec<String>>(CacheClass::Retrieval, &key).await {
            return passages;
        }

        match self.retriever.search(query, limit).await {
            Ok(mut passages) => {
                passages.truncate(limit);
                if !passages.is_empty() {
                    self.cache.set(CacheClass::Retrieval, &key, &passages).await;
                }
                passages
            }
            Err(e) => {
                tracing::warn!(error = %e, "Retrieval failed, skipping enrichment");
                Vec::new()
            }
        }
    }

    /// Deliver a terminal response
    fn finish(&self, caller: &str, response: Response, enqueued_at: Instant) {
        if response.is_error() {
            self.monitor.record_error();
        }
        self.monitor.record_latency(enqueued_at.elapsed());
        self.prioritizer.release(caller);

        let callback = self.callbacks.lock().remove(&response.request_id);
        self.results.complete(response.clone());
        if let Some(callback) = callback {
            callback(response);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::monitor::MonitorConfig;
    use crate::prioritizer::PrioritizerConfig;
    use crate::routing::test_utils::ScriptedBackend;
    use crate::routing::{CapabilityClass, ModelDescriptor, RouterConfig, StaticMetrics};

    struct FixedRetriever(Vec<String>);

    #[async_trait::async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>, RetrievalError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    fn dispatcher(backend: Arc<ScriptedBackend>, retriever: Arc<dyn Retriever>) -> Dispatcher {
        let catalog = vec![
            ModelDescriptor::new("small", CapabilityClass::FastResponse, 500, 0.5),
            ModelDescriptor::new("large", CapabilityClass::HighQuality, 2_000, 0.9),
        ];
        let router = ModelRouter::new(
            RouterConfig::default(),
            catalog,
            backend,
            Arc::new(StaticMetrics::idle(64_000)),
        );
        Dispatcher::new(
            DispatcherConfig {
                gate_capacity: 2,
                drain_timeout_secs: 1,
                ..DispatcherConfig::default()
            },
            EnrichmentConfig::default(),
            Components {
                cache: Arc::new(DistributedCache::in_memory(CacheConfig::default())),
                prioritizer: Arc::new(Prioritizer::new(PrioritizerConfig::default())),
                router: Arc::new(router),
                monitor: Arc::new(Monitor::new(MonitorConfig::default())),
                retriever,
            },
        )
    }

    #[tokio::test]
    async fn test_submit_and_await() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));
        d.start();

        let id = d.submit(Request::new("hello")).unwrap();
        let response = d.await_response(&id, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.request_id, id);
        assert!(!response.is_error());
        assert!(!response.cache_hit);
        assert!(response.text.contains("hello"));
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_has_no_side_effects() {
        let backend = Arc::new(ScriptedBackend::new(&["small"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));

        assert!(matches!(d.submit(Request::new("  ")), Err(GatewayError::Validation(_))));
        assert_eq!(d.metrics().total_requests, 0);
        assert_eq!(d.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_reused_id_rejected() {
        let backend = Arc::new(ScriptedBackend::new(&["small"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));

        d.submit(Request::new("a").with_id("same")).unwrap();
        let err = d.submit(Request::new("b").with_id("same")).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(d.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let backend = Arc::new(ScriptedBackend::new(&["small"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));
        let err = d.await_response("nope", Some(Duration::from_millis(10))).await;
        assert_eq!(err, Err(AwaitError::UnknownRequest("nope".into())));
    }

    #[tokio::test]
    async fn test_enrichment_reruns_with_context() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let retriever = Arc::new(FixedRetriever(vec!["passage one".into()]));
        let d = dispatcher(backend.clone(), retriever);
        d.start();

        let response = d
            .ask(Request::new("what is it").with_enrichment(true), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(response.enriched);
        assert!(response.text.contains("[1] passage one"));
        assert_eq!(backend.generate_count(), 2);
        assert_eq!(d.metrics().enrichments, 1);
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_enrichment_skipped_without_passages() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let d = dispatcher(backend.clone(), Arc::new(NoopRetriever));
        d.start();

        let response = d
            .ask(Request::new("what is it").with_enrichment(true), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!response.enriched);
        assert_eq!(backend.generate_count(), 1);
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_receives_response() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));
        d.start();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = d
            .submit_with_callback(Request::new("callback me"), move |response| {
                let _ = tx.send(response);
            })
            .unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(response.request_id, id);
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_to_smallest_succeeds() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        backend.fail_model("large");
        let d = dispatcher(backend.clone(), Arc::new(NoopRetriever));
        d.start();

        let response = d
            .ask(Request::new("x".repeat(300)), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!response.is_error());
        assert_eq!(response.model, "small");
        assert_eq!(d.metrics().fallbacks, 1);
        assert_eq!(d.metrics().errors, 0);
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_tickets() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let d = dispatcher(backend.clone(), Arc::new(NoopRetriever));

        // Never started: the ticket stays queued
        let id = d.submit(Request::new("stuck")).unwrap();
        d.shutdown().await;

        let response = d.await_response(&id, Some(Duration::from_millis(50))).await.unwrap();
        assert!(response.is_error());
        assert_eq!(backend.generate_count(), 0);
        assert!(d.submit(Request::new("after")).is_err());
    }

    #[tokio::test]
    async fn test_maintenance_records_history() {
        let backend = Arc::new(ScriptedBackend::new(&["small"]));
        let d = dispatcher(backend, Arc::new(NoopRetriever));
        let report = d.run_maintenance().await;
        assert_eq!(report.pruned_results, 0);
        assert_eq!(d.monitor().history().len(), 1);
    }

    struct PanickingRetriever;

    #[async_trait::async_trait]
    impl Retriever for PanickingRetriever {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<String>, RetrievalError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            panic!("retriever blew up");
        }
    }

    #[tokio::test]
    async fn test_worker_panic_fails_leader_and_followers() {
        let backend = Arc::new(ScriptedBackend::new(&["small", "large"]));
        let d = dispatcher(backend, Arc::new(PanickingRetriever));
        d.start();

        let request = || Request::new("same question").with_enrichment(true);
        let first = d.submit(request()).unwrap();
        let second = d.submit(request()).unwrap();

        for id in [&first, &second] {
            let response = d.await_response(id, Some(Duration::from_secs(5))).await.unwrap();
            assert!(response.is_error());
            assert_eq!(response.request_id, *id);
        }
        assert!(d.inner.in_progress.is_empty());
        assert_eq!(d.metrics().in_flight, 0);

        // The slot is free again: an identical request runs instead of joining
        let third = d.submit(request()).unwrap();
        let response = d.await_response(&third, Some(Duration::from_secs(5))).await.unwrap();
        assert!(response.is_error());
        d.shutdown().await;
    }
}
