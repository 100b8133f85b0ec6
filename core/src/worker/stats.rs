//! Dispatch and pool statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Statistics tracked by the scheduler while it dispatches
#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    /// Dispatches handed to the pool
    pub dispatched: u64,

    /// Dispatches dropped because the pool was full
    pub scheduling_misses: u64,

    /// Dispatch stopped early on a shutdown signal
    pub interrupted: bool,

    /// Dispatch window start
    pub started_at: Option<Instant>,

    /// Dispatch window end
    pub ended_at: Option<Instant>,
}

impl DispatchStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Record a successful hand-off
    pub fn record_dispatch(&mut self) {
        self.dispatched += 1;
    }

    /// Record a dropped tick
    pub fn record_miss(&mut self) {
        self.scheduling_misses += 1;
    }

    /// Ticks that came due (dispatched + missed)
    pub fn total_ticks(&self) -> u64 {
        self.dispatched + self.scheduling_misses
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Dispatches per second over the window
    pub fn dispatch_rate(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.dispatched as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }
}

/// Worker pool figures reported in the summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Slots expected to be busy in steady state
    pub preallocated: usize,
    /// Hard cap on in-flight operations
    pub max_workers: usize,
    /// Highest concurrent in-flight count observed
    pub peak_in_flight: usize,
    /// Operations aborted when the shutdown grace period ran out
    pub timed_out_at_shutdown: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_stats_defaults() {
        let stats = DispatchStats::default();
        assert_eq!(stats.dispatched, 0);
        assert_eq!(stats.scheduling_misses, 0);
        assert!(!stats.interrupted);
        assert!(stats.elapsed().is_none());
        assert_eq!(stats.dispatch_rate(), 0.0);
    }

    #[test]
    fn test_dispatch_stats_ticks() {
        let mut stats = DispatchStats::new();
        stats.record_dispatch();
        stats.record_dispatch();
        stats.record_miss();
        assert_eq!(stats.total_ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_rate_over_window() {
        let mut stats = DispatchStats::new();
        stats.start();
        for _ in 0..20 {
            stats.record_dispatch();
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        stats.stop();

        let elapsed = stats.elapsed().unwrap();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2010));
        assert!((stats.dispatch_rate() - 10.0).abs() < 0.1);
    }
}
