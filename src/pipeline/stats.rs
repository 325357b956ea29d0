// src/pipeline/stats.rs

//! Run statistics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Live counters updated by the workers.
#[derive(Debug, Default)]
pub struct ProbeStats {
    queued: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    resumed: AtomicUsize,
    filtered: AtomicUsize,
    requests: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queued: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Short-circuited by the host circuit breaker
    pub skipped: usize,
    /// Already completed by a previous run
    pub resumed: usize,
    /// Excluded by match/filter criteria
    pub filtered: usize,
    pub requests: usize,
}

impl StatsSnapshot {
    /// Targets that reached a terminal state in this run.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

impl ProbeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requests(&self, count: usize) {
        self.requests.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }

    /// Log one progress line.
    pub fn log_progress(&self, elapsed: Duration) {
        let s = self.snapshot();
        let secs = elapsed.as_secs_f64().max(0.001);
        log::info!(
            "[{:.0}s] {}/{} targets | ok {} | failed {} | skipped {} | {:.1} req/s",
            elapsed.as_secs_f64(),
            s.completed(),
            s.queued,
            s.succeeded,
            s.failed,
            s.skipped,
            s.requests as f64 / secs
        );
    }
}
