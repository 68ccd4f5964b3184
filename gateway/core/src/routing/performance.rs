//! Per-model performance records
//!
//! Smoothed with an exponential moving average:
//! `new = α·sample + (1 − α)·old`. Records are created on first use (or seeded
//! from the catalog) and never deleted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Smoothed statistics for one model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    /// Smoothed latency in milliseconds
    pub latency_ms: f64,
    /// Smoothed success rate in [0, 1]
    pub success_rate: f64,
    /// Smoothed error rate in [0, 1]
    pub error_rate: f64,
    /// Last call, successful or not
    pub last_used: Option<DateTime<Utc>>,
    /// Calls recorded
    pub usage_count: u64,
}

impl ModelPerformance {
    /// Optimistic starting record
    #[must_use]
    pub fn new(initial_latency_ms: f64) -> Self {
        Self {
            latency_ms: initial_latency_ms,
            success_rate: 1.0,
            error_rate: 0.0,
            last_used: None,
            usage_count: 0,
        }
    }

    pub fn record_success(&mut self, latency_ms: f64, alpha: f64) {
        self.latency_ms = alpha * latency_ms + (1.0 - alpha) * self.latency_ms;
        self.success_rate = alpha + (1.0 - alpha) * self.success_rate;
        self.error_rate *= 1.0 - alpha;
        self.touch();
    }

    /// Latency is left unchanged; a failed call says nothing about speed
    pub fn record_failure(&mut self, alpha: f64) {
        self.success_rate *= 1.0 - alpha;
        self.error_rate = alpha + (1.0 - alpha) * self.error_rate;
        self.touch();
    }

    fn touch(&mut self) {
        self.usage_count += 1;
        self.last_used = Some(Utc::now());
    }

    /// Healthy while the smoothed error rate is below `unhealthy_error_rate`
    #[must_use]
    pub fn is_healthy(&self, unhealthy_error_rate: f64) -> bool {
        self.error_rate < unhealthy_error_rate
    }
}

/// Performance records for every model, partitioned by name
#[derive(Debug)]
pub struct PerformanceTracker {
    alpha: f64,
    records: DashMap<String, ModelPerformance>,
}

impl PerformanceTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            records: DashMap::new(),
        }
    }

    /// Seed a record if none exists
    pub fn seed(&self, model: &str, initial_latency_ms: f64) {
        self.records
            .entry(model.to_string())
            .or_insert_with(|| ModelPerformance::new(initial_latency_ms));
    }

    pub fn record_success(&self, model: &str, latency_ms: f64) {
        self.records
            .entry(model.to_string())
            .or_insert_with(|| ModelPerformance::new(latency_ms))
            .record_success(latency_ms, self.alpha);
    }

    pub fn record_failure(&self, model: &str) {
        self.records
            .entry(model.to_string())
            .or_insert_with(|| ModelPerformance::new(0.0))
            .record_failure(self.alpha);
    }

    /// Current record, or a fresh optimistic one
    pub fn get(&self, model: &str) -> ModelPerformance {
        self.records
            .get(model)
            .map_or_else(|| ModelPerformance::new(0.0), |r| r.clone())
    }

    pub fn all(&self) -> BTreeMap<String, ModelPerformance> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_update() {
        let mut perf = ModelPerformance::new(1000.0);
        perf.record_success(2000.0, 0.1);
        assert!((perf.latency_ms - 1100.0).abs() < 1e-9);
        assert!((perf.success_rate - 1.0).abs() < 1e-9);

        perf.record_failure(0.1);
        assert!((perf.success_rate - 0.9).abs() < 1e-9);
        assert!((perf.error_rate - 0.1).abs() < 1e-9);
        assert!((perf.latency_ms - 1100.0).abs() < 1e-9);
        assert_eq!(perf.usage_count, 2);
    }

    #[test]
    fn test_repeated_failures_make_unhealthy() {
        let tracker = PerformanceTracker::new(0.1);
        tracker.seed("x", 500.0);
        for _ in 0..6 {
            tracker.record_failure("x");
        }
        // 1 - 0.9^6 ≈ 0.47
        assert!(tracker.get("x").is_healthy(0.5));
        tracker.record_failure("x");
        assert!(!tracker.get("x").is_healthy(0.5));
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let tracker = PerformanceTracker::new(0.5);
        tracker.seed("x", 100.0);
        tracker.record_success("x", 300.0);
        tracker.seed("x", 100.0);
        assert!((tracker.get("x").latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(tracker.all().len(), 1);
    }
}
