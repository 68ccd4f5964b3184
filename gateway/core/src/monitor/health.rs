//! Health derivation
//!
//! ```text
//!  error rate / p95 latency
//!  ───────────────────────────────────────────────────────────▶
//!  |      Healthy      |      Degraded      |     Critical     |
//!              degraded threshold     critical threshold
//! ```
//!
//! Whichever signal is worse wins.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall gateway health
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Error rate and latency inside targets
    #[default]
    Healthy,
    /// One signal above its degraded threshold
    Degraded,
    /// One signal above its critical threshold
    Critical,
}

impl HealthStatus {
    /// Check if the gateway is serving normally
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Thresholds for health derivation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Error rate at or above which health is degraded
    pub degraded_error_rate: f64,
    /// Error rate at or above which health is critical
    pub critical_error_rate: f64,
    /// p95 latency (ms) at or above which health is degraded
    pub degraded_p95_ms: f64,
    /// p95 latency (ms) at or above which health is critical
    pub critical_p95_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.05,
            critical_error_rate: 0.20,
            degraded_p95_ms: 10_000.0,
            critical_p95_ms: 30_000.0,
        }
    }
}

impl HealthThresholds {
    /// Classify a pair of signals
    #[must_use]
    pub fn classify(&self, error_rate: f64, p95_ms: f64) -> HealthStatus {
        let by_errors = Self::band(error_rate, self.degraded_error_rate, self.critical_error_rate);
        let by_latency = Self::band(p95_ms, self.degraded_p95_ms, self.critical_p95_ms);
        by_errors.max(by_latency)
    }

    fn band(value: f64, degraded: f64, critical: f64) -> HealthStatus {
        if value >= critical {
            HealthStatus::Critical
        } else if value >= degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
