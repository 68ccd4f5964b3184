//! Metrics and Health Monitor
//!
//! Aggregates gateway-wide counters and latency samples:
//! - Request, cache-hit, error, enrichment and fallback counters
//! - In-flight and queued gauges
//! - Latency percentiles over a bounded window
//! - Health derived from error rate and p95 latency
//! - A bounded rolling history of snapshots for trend queries
//!
//! Every operation takes `&self` and is safe under concurrent callers.

mod exporter;
mod health;
mod metrics;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use exporter::PrometheusExporter;
pub use health::{HealthStatus, HealthThresholds};
pub use metrics::{Counter, Gauge, LatencySummary, LatencyWindow};

// ============================================================================
// Configuration
// ============================================================================

/// Monitor configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Latency samples kept for percentiles
    pub latency_window: usize,
    /// Snapshots kept in the rolling history
    pub history_len: usize,
    /// Health thresholds
    pub health: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_window: 1000,
            history_len: 288,
            health: HealthThresholds::default(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of the monitor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub errors: u64,
    pub enrichments: u64,
    pub fallbacks: u64,
    pub in_flight: u64,
    pub queued: u64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub latency: LatencySummary,
    pub health: HealthStatus,
}

// ============================================================================
// Monitor
// ============================================================================

/// Gateway metrics and health
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    total_requests: Counter,
    cache_hits: Counter,
    errors: Counter,
    enrichments: Counter,
    fallbacks: Counter,
    in_flight: Gauge,
    queued: Gauge,
    latency: LatencyWindow,
    history: Mutex<VecDeque<MetricsSnapshot>>,
    exporter: Option<PrometheusExporter>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl Monitor {
    /// Create a monitor
    pub fn new(config: MonitorConfig) -> Self {
        let exporter = PrometheusExporter::new()
            .map_err(|e| tracing::warn!(error = %e, "Prometheus metrics unavailable"))
            .ok();
        Self {
            exporter,
            latency: LatencyWindow::new(config.latency_window),
            history: Mutex::new(VecDeque::with_capacity(config.history_len.max(1))),
            config,
            total_requests: Counter::new(),
            cache_hits: Counter::new(),
            errors: Counter::new(),
            enrichments: Counter::new(),
            fallbacks: Counter::new(),
            in_flight: Gauge::new(),
            queued: Gauge::new(),
        }
    }

    /// An admitted submission
    pub fn record_request(&self) {
        self.total_requests.inc();
        self.export(|e| e.requests.inc());
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
        self.export(|e| e.cache_hits.inc());
    }

    /// A request that ended with an error Response
    pub fn record_error(&self) {
        self.errors.inc();
        self.export(|e| e.errors.inc());
    }

    pub fn record_enrichment(&self) {
        self.enrichments.inc();
        self.export(|e| e.enrichments.inc());
    }

    pub fn record_fallback(&self) {
        self.fallbacks.inc();
        self.export(|e| e.fallbacks.inc());
    }

    /// End-to-end latency of a completed request
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed.as_secs_f64() * 1000.0);
        self.export(|e| e.duration.observe(elapsed.as_secs_f64()));
    }

    /// Gauge of backend calls in flight
    pub fn in_flight(&self) -> &Gauge {
        &self.in_flight
    }

    /// Gauge of tickets waiting in the queue
    pub fn queued(&self) -> &Gauge {
        &self.queued
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }

    /// Current health
    pub fn health(&self) -> HealthStatus {
        self.snapshot().health
    }

    /// Take a snapshot without recording it
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.get();
        let errors = self.errors.get();
        let cache_hits = self.cache_hits.get();
        let latency = self.latency.summary();

        let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        let error_rate = ratio(errors);

        MetricsSnapshot {
            taken_at: Utc::now(),
            total_requests: total,
            cache_hits,
            errors,
            enrichments: self.enrichments.get(),
            fallbacks: self.fallbacks.get(),
            in_flight: self.in_flight.get(),
            queued: self.queued.get(),
            error_rate,
            cache_hit_rate: ratio(cache_hits),
            health: self.config.health.classify(error_rate, latency.p95),
            latency,
        }
    }

    /// Take a snapshot and append it to the rolling history
    pub fn record_snapshot(&self) -> MetricsSnapshot {
        let snapshot = self.snapshot();
        let mut history = self.history.lock();
        if history.len() >= self.config.history_len.max(1) {
            history.pop_front();
        }
        history.push_back(snapshot.clone());
        snapshot
    }

    /// Recorded snapshots, oldest first
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    /// Export the current snapshot in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        self.exporter
            .as_ref()
            .map(|exporter| exporter.encode(&self.snapshot()))
            .unwrap_or_default()
    }

    fn export(&self, update: impl FnOnce(&PrometheusExporter)) {
        if let Some(exporter) = &self.exporter {
            update(exporter);
        }
    }
}
