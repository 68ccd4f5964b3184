//! Request Prioritizer
//!
//! Turns a priority label and caller tier into one comparable number,
//! assigns the `Await` timeout, and enforces per-caller quotas.
//!
//! ```text
//! priority = base_weight(label) × boost(tier) + jitter(submitted_at)
//! jitter   = span / (1 + seconds_since_start)      ∈ (0, span]
//! ```
//!
//! The jitter shrinks monotonically with submission time, so between two
//! otherwise equal tickets the earlier one ranks higher. `span` stays below
//! the smallest gap between distinct weight products, so jitter never moves a
//! ticket across classes.

mod quota;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::request::{CallerTier, PriorityLabel, Request};

pub use quota::{CallerStats, QuotaTable, QuotaTracker, TierQuota};

// =============================================================================
// Configuration
// =============================================================================

/// Default `Await` timeout per label, in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutTable {
    pub critical_secs: u64,
    pub high_secs: u64,
    pub normal_secs: u64,
    pub low_secs: u64,
    pub background_secs: u64,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            critical_secs: 30,
            high_secs: 60,
            normal_secs: 120,
            low_secs: 300,
            background_secs: 600,
        }
    }
}

impl TimeoutTable {
    /// Timeout for a label
    #[must_use]
    pub fn for_label(&self, label: PriorityLabel) -> Duration {
        Duration::from_secs(match label {
            PriorityLabel::Critical => self.critical_secs,
            PriorityLabel::High => self.high_secs,
            PriorityLabel::Normal => self.normal_secs,
            PriorityLabel::Low => self.low_secs,
            PriorityLabel::Background => self.background_secs,
        })
    }

    /// Whether timeouts never decrease as priority decreases
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        PriorityLabel::ALL
            .windows(2)
            .all(|w| self.for_label(w[0]) <= self.for_label(w[1]))
    }
}

/// Prioritizer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizerConfig {
    /// Per-tier quota limits
    pub quotas: QuotaTable,
    /// Per-label `Await` timeouts
    pub timeouts: TimeoutTable,
    /// Rolling window for the per-minute limit (seconds)
    pub rate_window_secs: u64,
    /// Retention of per-caller history (seconds)
    pub history_retention_secs: u64,
    /// Upper bound of the tie-breaking jitter
    pub jitter_span: f64,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            quotas: QuotaTable::default(),
            timeouts: TimeoutTable::default(),
            rate_window_secs: 60,
            history_retention_secs: 24 * 60 * 60,
            jitter_span: 0.5,
        }
    }
}

// =============================================================================
// Admission
// =============================================================================

/// Result of a successful admission
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Admission {
    /// Numeric priority, higher dequeues first
    pub priority: f64,
    /// Default `Await` timeout
    pub timeout: Duration,
}

/// Aggregate statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrioritizerStats {
    /// Admissions per label since start
    pub admitted_by_label: BTreeMap<String, u64>,
    /// Admissions per label inside the history retention
    pub recent_by_label: BTreeMap<String, u64>,
    /// Rejected submissions since start
    pub rejected: u64,
    /// Callers currently tracked
    pub callers: usize,
}

// =============================================================================
// Prioritizer
// =============================================================================

/// Priority scoring, timeouts and quotas
#[derive(Debug)]
pub struct Prioritizer {
    config: PrioritizerConfig,
    quotas: QuotaTracker,
    started: Instant,
    admitted: [AtomicU64; 5],
    rejected: AtomicU64,
}

impl Default for Prioritizer {
    fn default() -> Self {
        Self::new(PrioritizerConfig::default())
    }
}

impl Prioritizer {
    pub fn new(config: PrioritizerConfig) -> Self {
        let quotas = QuotaTracker::new(
            config.quotas.clone(),
            Duration::from_secs(config.rate_window_secs),
        );
        Self {
            config,
            quotas,
            started: Instant::now(),
            admitted: Default::default(),
            rejected: AtomicU64::new(0),
        }
    }

    /// Numeric priority for a label and tier submitted at `at`
    #[must_use]
    pub fn score(&self, label: PriorityLabel, tier: CallerTier, at: Instant) -> f64 {
        let elapsed = at.saturating_duration_since(self.started).as_secs_f64();
        let jitter = self.config.jitter_span / (1.0 + elapsed);
        label.base_weight() * tier.boost() + jitter
    }

    #[must_use]
    pub fn timeout_for(&self, label: PriorityLabel) -> Duration {
        self.config.timeouts.for_label(label)
    }

    /// Check quota and compute priority for a request
    ///
    /// # Errors
    ///
    /// [`GatewayError::QuotaExceeded`] when either limit is hit; no quota
    /// state is consumed in that case.
    pub fn admit(&self, request: &Request) -> Result<Admission, GatewayError> {
        let now = Instant::now();
        if let Err(violation) =
            self.quotas
                .try_admit(&request.caller, request.tier, request.priority, now)
        {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                caller = %request.caller,
                tier = %request.tier,
                %violation,
                "Submission rejected by quota"
            );
            return Err(GatewayError::QuotaExceeded {
                caller: request.caller.clone(),
                violation,
            });
        }

        if let Some(i) = PriorityLabel::ALL.iter().position(|l| *l == request.priority) {
            self.admitted[i].fetch_add(1, Ordering::Relaxed);
        }

        Ok(Admission {
            priority: self.score(request.priority, request.tier, now),
            timeout: self.timeout_for(request.priority),
        })
    }

    /// Release a caller's outstanding slot once its request is terminal
    pub fn release(&self, caller: &str) {
        self.quotas.release(caller);
    }

    /// Drop history older than the retention window
    pub fn prune_history(&self) -> usize {
        self.quotas.prune(
            Duration::from_secs(self.config.history_retention_secs),
            Instant::now(),
        )
    }

    pub fn caller(&self, caller: &str) -> Option<CallerStats> {
        self.quotas.caller(caller)
    }

    pub fn stats(&self) -> PrioritizerStats {
        let recent = self.quotas.recent_by_label();
        let mut stats = PrioritizerStats {
            rejected: self.rejected.load(Ordering::Relaxed),
            callers: self.quotas.caller_count(),
            ..PrioritizerStats::default()
        };
        for (i, label) in PriorityLabel::ALL.iter().enumerate() {
            stats
                .admitted_by_label
                .insert(label.to_string(), self.admitted[i].load(Ordering::Relaxed));
            stats.recent_by_label.insert(label.to_string(), recent[i]);
        }
        stats
    }
}
