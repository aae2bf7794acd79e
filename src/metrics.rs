// src/metrics.rs
//
// Lifetime counters for limiter activity
// Observational only; scheduling never reads them

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by a limiter and all of its clones.
#[derive(Debug, Default)]
pub(crate) struct LimiterMetrics {
    /// Submissions accepted (queued or started).
    submitted: AtomicU64,
    /// Task factories invoked.
    started: AtomicU64,
    /// Tasks settled, in either outcome.
    settled: AtomicU64,
}

impl LimiterMetrics {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settled(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub(crate) fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub(crate) fn settled(&self) -> u64 {
        self.settled.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a limiter's occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    /// Slot cap, or `None` for a pass-through limiter.
    pub max_concurrency: Option<usize>,
    /// Slots occupied right now.
    pub active: usize,
    /// Submissions waiting for a slot right now.
    pub queued: usize,
    /// Total submissions accepted.
    pub submitted: u64,
    /// Total task factories invoked.
    pub started: u64,
    /// Total tasks settled.
    pub settled: u64,
}

impl LimiterStats {
    /// Tasks invoked but not yet settled.
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.settled)
    }
}
