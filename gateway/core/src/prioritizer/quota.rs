//! Per-caller quota tracking
//!
//! Each caller has a rolling window of admission timestamps (per-minute
//! rate), an outstanding count (max concurrent) and a longer history kept
//! for statistics. State is partitioned by caller in a `DashMap`; the entry
//! guard makes check-and-record atomic per caller.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::QuotaViolation;
use crate::request::{CallerTier, PriorityLabel};

// =============================================================================
// Configuration
// =============================================================================

/// Limits for one tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuota {
    /// Maximum outstanding requests
    pub max_concurrent: u32,
    /// Maximum admissions per rolling minute
    pub per_minute: u32,
}

impl TierQuota {
    #[must_use]
    pub const fn new(max_concurrent: u32, per_minute: u32) -> Self {
        Self {
            max_concurrent,
            per_minute,
        }
    }
}

/// Quota limits for every tier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaTable {
    pub premium: TierQuota,
    pub standard: TierQuota,
    pub basic: TierQuota,
    pub free: TierQuota,
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            premium: TierQuota::new(20, 300),
            standard: TierQuota::new(10, 120),
            basic: TierQuota::new(5, 60),
            free: TierQuota::new(2, 20),
        }
    }
}

impl QuotaTable {
    /// Limits for a tier
    #[must_use]
    pub fn for_tier(&self, tier: CallerTier) -> TierQuota {
        match tier {
            CallerTier::Premium => self.premium,
            CallerTier::Standard => self.standard,
            CallerTier::Basic => self.basic,
            CallerTier::Free => self.free,
        }
    }
}

// =============================================================================
// Caller State
// =============================================================================

#[derive(Debug)]
struct CallerState {
    tier: CallerTier,
    window: VecDeque<Instant>,
    history: VecDeque<(Instant, PriorityLabel)>,
    outstanding: u32,
    admitted: u64,
    rejected: u64,
    last_seen: Instant,
}

impl CallerState {
    fn new(tier: CallerTier, now: Instant) -> Self {
        Self {
            tier,
            window: VecDeque::new(),
            history: VecDeque::new(),
            outstanding: 0,
            admitted: 0,
            rejected: 0,
            last_seen: now,
        }
    }

    fn prune_window(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.window.front() {
            if now.duration_since(oldest) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn prune_history(&mut self, now: Instant, retention: Duration) {
        while let Some(&(oldest, _)) = self.history.front() {
            if now.duration_since(oldest) >= retention {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Snapshot of one caller's quota state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerStats {
    pub tier: CallerTier,
    pub outstanding: u32,
    pub in_window: usize,
    pub admitted: u64,
    pub rejected: u64,
}

// =============================================================================
// Quota Tracker
// =============================================================================

/// Tracks quota state for every caller
#[derive(Debug)]
pub struct QuotaTracker {
    table: QuotaTable,
    window: Duration,
    callers: DashMap<String, CallerState>,
}

impl QuotaTracker {
    pub fn new(table: QuotaTable, window: Duration) -> Self {
        Self {
            table,
            window,
            callers: DashMap::new(),
        }
    }

    /// Check both limits and record the admission if they hold
    ///
    /// A rejection changes nothing except the caller's rejected count.
    pub fn try_admit(
        &self,
        caller: &str,
        tier: CallerTier,
        label: PriorityLabel,
        now: Instant,
    ) -> Result<(), QuotaViolation> {
        let mut state = self
            .callers
            .entry(caller.to_string())
            .or_insert_with(|| CallerState::new(tier, now));

        // Tier can change between submissions
        state.tier = tier;
        state.last_seen = now;
        state.prune_window(now, self.window);

        let quota = self.table.for_tier(tier);
        if state.outstanding >= quota.max_concurrent {
            state.rejected += 1;
            return Err(QuotaViolation::Concurrency {
                limit: quota.max_concurrent,
            });
        }
        if state.window.len() >= quota.per_minute as usize {
            state.rejected += 1;
            return Err(QuotaViolation::Rate {
                limit: quota.per_minute,
            });
        }

        state.window.push_back(now);
        state.history.push_back((now, label));
        state.outstanding += 1;
        state.admitted += 1;
        Ok(())
    }

    /// Mark one outstanding request as finished
    pub fn release(&self, caller: &str) {
        if let Some(mut state) = self.callers.get_mut(caller) {
            state.outstanding = state.outstanding.saturating_sub(1);
        }
    }

    /// Prune histories older than `retention` and forget idle callers
    pub fn prune(&self, retention: Duration, now: Instant) -> usize {
        // Counted inside retain: admissions may insert callers concurrently
        let mut removed = 0;
        self.callers.retain(|_, state| {
            state.prune_history(now, retention);
            state.prune_window(now, self.window);
            let keep = state.outstanding > 0 || now.duration_since(state.last_seen) < retention;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Admissions per label still inside the history retention
    pub fn recent_by_label(&self) -> [u64; 5] {
        let mut counts = [0_u64; 5];
        for state in &self.callers {
            for (_, label) in &state.history {
                if let Some(i) = PriorityLabel::ALL.iter().position(|l| l == label) {
                    counts[i] += 1;
                }
            }
        }
        counts
    }

    pub fn caller(&self, caller: &str) -> Option<CallerStats> {
        self.callers.get(caller).map(|s| CallerStats {
            tier: s.tier,
            outstanding: s.outstanding,
            in_window: s.window.len(),
            admitted: s.admitted,
            rejected: s.rejected,
        })
    }

    pub fn caller_count(&self) -> usize {
        self.callers.len()
    }
}
