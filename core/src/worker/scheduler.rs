//! Constant-arrival-rate dispatch

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};

use crate::config::TestConfig;
use crate::error::FailureReason;
use crate::metrics::MetricsAggregator;
use crate::response::OperationOutcome;

use super::pool::{DispatchError, WorkerPool};
use super::stats::DispatchStats;

/// When each operation is due, relative to the start of the run
///
/// The effective rate ramps linearly from zero to `rate` over `ramp_up`,
/// then stays flat. The n-th arrival (from zero) is due when the integral
/// of the effective rate reaches n, so the long-run average converges on
/// `rate` regardless of how long operations take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalSchedule {
    rate: f64,
    ramp_up: Duration,
}

impl ArrivalSchedule {
    /// Schedule `rate` operations per second after a linear ramp
    pub fn new(rate: f64, ramp_up: Duration) -> Self {
        Self { rate, ramp_up }
    }

    /// Operation schedule for a test configuration
    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(config.operation_rate(), config.ramp_up)
    }

    /// Steady-state operations per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Instantaneous target rate at `elapsed`
    pub fn effective_rate(&self, elapsed: Duration) -> f64 {
        let ramp = self.ramp_up.as_secs_f64();
        let t = elapsed.as_secs_f64();
        if ramp > 0.0 && t < ramp {
            self.rate * t / ramp
        } else {
            self.rate
        }
    }

    /// Arrivals the schedule has called for by `elapsed`
    pub fn expected_arrivals(&self, elapsed: Duration) -> f64 {
        let ramp = self.ramp_up.as_secs_f64();
        let t = elapsed.as_secs_f64();
        if ramp <= 0.0 {
            self.rate * t
        } else if t < ramp {
            self.rate * t * t / (2.0 * ramp)
        } else {
            self.rate * ramp / 2.0 + self.rate * (t - ramp)
        }
    }

    /// Offset at which arrival `n` is due
    pub fn offset_of(&self, n: u64) -> Duration {
        let n = n as f64;
        let ramp = self.ramp_up.as_secs_f64();
        let ramp_arrivals = self.rate * ramp / 2.0;

        let secs = if ramp <= 0.0 {
            n / self.rate
        } else if n < ramp_arrivals {
            (2.0 * n * ramp / self.rate).sqrt()
        } else {
            ramp + (n - ramp_arrivals) / self.rate
        };

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Issues dispatches on an [`ArrivalSchedule`] for a fixed window
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: ArrivalSchedule,
    duration: Duration,
}

impl Scheduler {
    /// Create a scheduler for `duration`
    pub fn new(schedule: ArrivalSchedule, duration: Duration) -> Self {
        Self { schedule, duration }
    }

    /// The schedule in use
    pub fn schedule(&self) -> &ArrivalSchedule {
        &self.schedule
    }

    /// Dispatch until the window closes or `shutdown` fires
    ///
    /// `make_op` is called with the arrival index for every tick the pool
    /// accepts. A tick that finds every slot busy is counted as a scheduling
    /// miss and dropped; nothing is queued. Overdue ticks are issued
    /// immediately. Unless interrupted, returns no earlier than the end of
    /// the window.
    pub async fn run<F, Fut>(
        &self,
        pool: &mut WorkerPool,
        metrics: &MetricsAggregator,
        mut make_op: F,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> DispatchStats
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = OperationOutcome> + Send + 'static,
    {
        let mut stats = DispatchStats::new();
        stats.start();
        let start = Instant::now();
        let deadline = start + self.duration;

        tracing::debug!(
            rate = self.schedule.rate,
            ramp_up_secs = self.schedule.ramp_up.as_secs_f64(),
            duration_secs = self.duration.as_secs_f64(),
            "Scheduler started"
        );

        let mut n: u64 = 0;
        loop {
            let due = match start.checked_add(self.schedule.offset_of(n)) {
                Some(due) if due < deadline => due,
                _ => break,
            };

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!(arrival = n, "Scheduler received shutdown signal");
                    stats.interrupted = true;
                    break;
                }

                _ = sleep_until(due) => {}
            }

            match pool.try_dispatch(make_op(n)) {
                Ok(()) => stats.record_dispatch(),
                Err(DispatchError::Exhausted) => {
                    stats.record_miss();
                    metrics.record_scheduling_miss();
                    tracing::debug!(
                        arrival = n,
                        reason = %FailureReason::SchedulingCapacityExceeded,
                        in_flight = pool.in_flight(),
                        "Dispatch dropped"
                    );
                }
                Err(DispatchError::Closed) => break,
            }
            n += 1;
        }

        if !stats.interrupted {
            tokio::select! {
                biased;
                _ = shutdown.recv() => stats.interrupted = true,
                _ = sleep_until(deadline) => {}
            }
        }

        stats.stop();
        tracing::debug!(
            dispatched = stats.dispatched,
            scheduling_misses = stats.scheduling_misses,
            interrupted = stats.interrupted,
            "Scheduler finished"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_schedule_offsets() {
        let s = ArrivalSchedule::new(10.0, Duration::ZERO);
        assert_eq!(s.offset_of(0), Duration::ZERO);
        assert!((s.offset_of(1).as_secs_f64() - 0.1).abs() < 1e-9);
        assert_eq!(s.offset_of(25), Duration::from_millis(2500));
        assert_eq!(s.effective_rate(Duration::from_secs(1)), 10.0);
    }

    #[test]
    fn test_ramp_rate_is_monotonic_and_reaches_target() {
        let s = ArrivalSchedule::new(100.0, Duration::from_secs(10));
        let mut prev = -1.0;
        for ms in (0..=12_000).step_by(250) {
            let r = s.effective_rate(Duration::from_millis(ms));
            assert!(r >= prev);
            assert!(r <= 100.0);
            prev = r;
        }
        assert_eq!(s.effective_rate(Duration::from_secs(10)), 100.0);
        assert_eq!(s.effective_rate(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_ramp_offsets_invert_expected_arrivals() {
        let s = ArrivalSchedule::new(40.0, Duration::from_secs(5));
        let mut prev = Duration::ZERO;
        for n in 0..400u64 {
            let t = s.offset_of(n);
            assert!(t >= prev, "offsets must be non-decreasing");
            prev = t;
            let back = s.expected_arrivals(t);
            assert!((back - n as f64).abs() < 1e-6, "n={n} back={back}");
        }
    }

    #[test]
    fn test_ramp_halves_arrivals_during_window() {
        let s = ArrivalSchedule::new(40.0, Duration::from_secs(5));
        assert!((s.expected_arrivals(Duration::from_secs(5)) - 100.0).abs() < 1e-9);
        assert!((s.expected_arrivals(Duration::from_secs(6)) - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_rate_does_not_overflow() {
        let s = ArrivalSchedule::new(1e-300, Duration::ZERO);
        assert_eq!(s.offset_of(5), Duration::MAX);
    }
}
