//! Prometheus exposition
//!
//! Each monitor owns its own registry, so several dispatchers in one process
//! never collide on metric names.

use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

use super::{HealthStatus, MetricsSnapshot};

const NAMESPACE: &str = "gateway";

/// Prometheus mirror of the monitor's counters and gauges
pub struct PrometheusExporter {
    registry: Registry,
    pub(super) requests: IntCounter,
    pub(super) cache_hits: IntCounter,
    pub(super) errors: IntCounter,
    pub(super) enrichments: IntCounter,
    pub(super) fallbacks: IntCounter,
    pub(super) duration: Histogram,
    in_flight: IntGauge,
    queued: IntGauge,
    health: IntGauge,
    latency_ms: GaugeVec,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

impl PrometheusExporter {
    /// Create and register every metric on a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let metric = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };
        let gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let metric = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };

        let requests = counter("requests_total", "Admitted requests")?;
        let cache_hits = counter("cache_hits_total", "Requests served from cache")?;
        let errors = counter("errors_total", "Requests that ended in an error response")?;
        let enrichments = counter("enrichments_total", "Requests enriched with retrieved context")?;
        let fallbacks = counter("fallbacks_total", "Fallback attempts against the smallest model")?;
        let in_flight = gauge("in_flight", "Backend calls in flight")?;
        let queued = gauge("queued", "Tickets waiting in the queue")?;
        let health = gauge("health", "0 healthy, 1 degraded, 2 critical")?;

        let duration = Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "End-to-end request latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        let latency_ms = GaugeVec::new(
            Opts::new("latency_ms", "Latency percentiles over the recent window")
                .namespace(NAMESPACE),
            &["percentile"],
        )?;
        registry.register(Box::new(latency_ms.clone()))?;

        Ok(Self {
            registry,
            requests,
            cache_hits,
            errors,
            enrichments,
            fallbacks,
            duration,
            in_flight,
            queued,
            health,
            latency_ms,
        })
    }

    /// Refresh the point-in-time gauges from `snapshot` and encode everything
    pub fn encode(&self, snapshot: &MetricsSnapshot) -> String {
        let to_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        self.in_flight.set(to_i64(snapshot.in_flight));
        self.queued.set(to_i64(snapshot.queued));
        self.health.set(match snapshot.health {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Critical => 2,
        });
        for (label, value) in [
            ("p50", snapshot.latency.median),
            ("p95", snapshot.latency.p95),
            ("p99", snapshot.latency.p99),
        ] {
            self.latency_ms.with_label_values(&[label]).set(value);
        }

        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| format!("# Error encoding metrics: {e}"))
    }
}
