//! Counters for monitoring a pool: how work was delivered, how often the
//! backlog had to be drained, and how many handler invocations completed.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total tasks submitted
    submitted: AtomicU64,
    /// Tasks handed straight to an idle worker
    direct_handoffs: AtomicU64,
    /// Tasks that found no idle worker and went to the backlog
    backlogged: AtomicU64,
    /// Number of times a drain process started (or re-claimed the drain flag)
    drains_started: AtomicU64,
    /// Drain processes currently running
    active_drains: AtomicUsize,
    /// Highest number of simultaneously running drain processes observed
    peak_drains: AtomicUsize,
    /// Handler invocations finished, including ones that panicked
    completed: AtomicU64,
    /// Handler invocations that panicked
    panicked: AtomicU64,
}

impl PoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_direct_handoff(&self) {
        self.direct_handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backlogged(&self) {
        self.backlogged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_start(&self) {
        self.drains_started.fetch_add(1, Ordering::Relaxed);
        let active = self.active_drains.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_drains.fetch_max(active, Ordering::SeqCst);
    }

    pub fn record_drain_stop(&self) {
        self.active_drains.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get_active_drains(&self) -> usize {
        self.active_drains.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_peak_drains(&self) -> usize {
        self.peak_drains.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            direct_handoffs: self.direct_handoffs.load(Ordering::Relaxed),
            backlogged: self.backlogged.load(Ordering::Relaxed),
            drains_started: self.drains_started.load(Ordering::Relaxed),
            active_drains: self.active_drains.load(Ordering::SeqCst),
            peak_drains: self.peak_drains.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub direct_handoffs: u64,
    pub backlogged: u64,
    pub drains_started: u64,
    pub active_drains: usize,
    pub peak_drains: usize,
    pub completed: u64,
    pub panicked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_metrics() {
        let metrics = PoolMetrics::new();
        let empty = metrics.snapshot();
        assert_eq!(empty.submitted, 0);
        assert_eq!(empty.completed, 0);

        metrics.record_submit();
        metrics.record_submit();
        metrics.record_direct_handoff();
        metrics.record_backlogged();
        metrics.record_completion();
        metrics.record_panic();

        let snap = metrics.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.direct_handoffs, 1);
        assert_eq!(snap.backlogged, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.panicked, 1);
    }

    #[test]
    fn test_peak_drains_tracks_overlap() {
        let metrics = PoolMetrics::new();
        metrics.record_drain_start();
        metrics.record_drain_stop();
        metrics.record_drain_start();
        assert_eq!(metrics.get_active_drains(), 1);
        assert_eq!(metrics.get_peak_drains(), 1);

        metrics.record_drain_start();
        assert_eq!(metrics.get_peak_drains(), 2);
        metrics.record_drain_stop();
        metrics.record_drain_stop();
        assert_eq!(metrics.get_active_drains(), 0);
        assert_eq!(metrics.snapshot().drains_started, 3);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = PoolMetrics::new();
        metrics.record_submit();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["submitted"], 1);
        assert_eq!(json["peak_drains"], 0);
    }
}
