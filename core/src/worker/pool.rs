//! Bounded pool of in-flight operations

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::config::WorkerPoolSizing;
use crate::error::{BenchError, FailureReason};
use crate::metrics::MetricsAggregator;
use crate::response::OperationOutcome;

use super::stats::PoolStats;

/// Why a dispatch was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Every slot up to `max_workers` is busy
    #[error("worker pool exhausted")]
    Exhausted,
    /// The pool is draining and accepts no new work
    #[error("worker pool closed")]
    Closed,
}

/// Releases the slot when the operation finishes, panics or is aborted
struct SlotGuard {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs dispatched operations with at most `max_workers` in flight
///
/// Each accepted operation becomes a tokio task that records its outcome
/// in the aggregator before releasing its slot.
pub struct WorkerPool {
    sizing: WorkerPoolSizing,
    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
    metrics: Arc<MetricsAggregator>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: usize,
    grew_past_preallocated: bool,
    accepting: bool,
}

impl WorkerPool {
    /// Create a pool with the given bounds
    pub fn new(sizing: WorkerPoolSizing, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            sizing,
            slots: Arc::new(Semaphore::new(sizing.max_workers)),
            tasks: JoinSet::new(),
            metrics,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: 0,
            grew_past_preallocated: false,
            accepting: true,
        }
    }

    /// Pool bounds
    pub fn sizing(&self) -> WorkerPoolSizing {
        self.sizing
    }

    /// Operations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count seen so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Start `op` on a free slot, or refuse immediately
    pub fn try_dispatch<Fut>(&mut self, op: Fut) -> Result<(), DispatchError>
    where
        Fut: Future<Output = OperationOutcome> + Send + 'static,
    {
        if !self.accepting {
            return Err(DispatchError::Closed);
        }
        self.reap();

        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| DispatchError::Exhausted)?;

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight = self.peak_in_flight.max(now);
        if now > self.sizing.preallocated && !self.grew_past_preallocated {
            self.grew_past_preallocated = true;
            tracing::info!(
                in_flight = now,
                preallocated = self.sizing.preallocated,
                max_workers = self.sizing.max_workers,
                "Worker pool grew past preallocated size"
            );
        }

        let guard = SlotGuard {
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        };
        let metrics = Arc::clone(&self.metrics);

        self.tasks.spawn(async move {
            let outcome = op.await;
            metrics.record(&outcome);
            drop(guard);
        });

        Ok(())
    }

    /// Collect finished tasks so the join set stays small over long runs
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                log_join_error(&e);
            }
        }
    }

    /// Stop accepting work and wait up to `grace` for in-flight operations
    ///
    /// Operations still running afterwards are aborted and each is recorded
    /// as a `timeout-at-shutdown` failure.
    pub async fn shutdown(&mut self, grace: Duration) -> PoolStats {
        self.accepting = false;
        let pending = self.tasks.len();
        tracing::debug!(pending, grace_secs = grace.as_secs_f64(), "Draining worker pool");

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    log_join_error(&e);
                }
            }
        })
        .await
        .is_ok();

        let mut timed_out = 0;
        if !drained {
            self.tasks.abort_all();
            while let Some(result) = self.tasks.join_next().await {
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => {
                        timed_out += 1;
                        self.metrics.record(&OperationOutcome::failure(
                            FailureReason::TimeoutAtShutdown,
                            format!("still in flight after {grace:?} grace period"),
                        ));
                    }
                    Err(e) => log_join_error(&e),
                }
            }
            tracing::warn!(
                timed_out,
                grace_secs = grace.as_secs_f64(),
                "Aborted operations still in flight at shutdown"
            );
        }

        self.stats(timed_out)
    }

    fn stats(&self, timed_out_at_shutdown: usize) -> PoolStats {
        PoolStats {
            preallocated: self.sizing.preallocated,
            max_workers: self.sizing.max_workers,
            peak_in_flight: self.peak_in_flight,
            timed_out_at_shutdown,
        }
    }
}

/// A panicked operation task; cancellations are accounted for separately
fn join_failure(e: &JoinError) -> Option<BenchError> {
    e.is_panic()
        .then(|| BenchError::orchestration(format!("operation task panicked: {e}")))
}

fn log_join_error(e: &JoinError) {
    if let Some(err) = join_failure(e) {
        tracing::error!(error = %err, "Worker task failed");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("sizing", &self.sizing)
            .field("in_flight", &self.in_flight())
            .field("peak_in_flight", &self.peak_in_flight)
            .field("accepting", &self.accepting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(preallocated: usize, max_workers: usize) -> (WorkerPool, Arc<MetricsAggregator>) {
        let metrics = Arc::new(MetricsAggregator::new().unwrap());
        let sizing = WorkerPoolSizing {
            preallocated,
            max_workers,
        };
        (WorkerPool::new(sizing, Arc::clone(&metrics)), metrics)
    }

    fn slow_success(delay: Duration) -> impl Future<Output = OperationOutcome> + Send + 'static {
        async move {
            tokio::time::sleep(delay).await;
            OperationOutcome::success(delay.as_secs_f64() * 1000.0, 10, 1, 1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_refuses_past_max() {
        let (mut pool, _metrics) = pool(1, 2);
        assert!(pool.try_dispatch(slow_success(Duration::from_secs(1))).is_ok());
        assert!(pool.try_dispatch(slow_success(Duration::from_secs(1))).is_ok());
        assert_eq!(
            pool.try_dispatch(slow_success(Duration::from_secs(1))),
            Err(DispatchError::Exhausted)
        );
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_frees_slots_on_completion() {
        let (mut pool, metrics) = pool(1, 1);
        pool.try_dispatch(slow_success(Duration::from_millis(10)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.try_dispatch(slow_success(Duration::from_millis(10))).is_ok());

        let stats = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats.timed_out_at_shutdown, 0);
        assert_eq!(metrics.snapshot().operations_succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_within_grace() {
        let (mut pool, metrics) = pool(2, 4);
        for _ in 0..3 {
            pool.try_dispatch(slow_success(Duration::from_millis(500)))
                .unwrap();
        }
        let stats = pool.shutdown(Duration::from_secs(2)).await;
        assert_eq!(stats.timed_out_at_shutdown, 0);
        assert_eq!(stats.peak_in_flight, 3);
        assert_eq!(metrics.snapshot().operations_succeeded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_marks_stragglers_as_timeout() {
        let (mut pool, metrics) = pool(1, 4);
        pool.try_dispatch(slow_success(Duration::from_millis(100)))
            .unwrap();
        pool.try_dispatch(slow_success(Duration::from_secs(60)))
            .unwrap();
        pool.try_dispatch(slow_success(Duration::from_secs(60)))
            .unwrap();

        let stats = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats.timed_out_at_shutdown, 2);
        assert_eq!(pool.in_flight(), 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.operations_succeeded, 1);
        assert_eq!(snap.operations_failed, 2);
        assert_eq!(
            snap.failures.get(&FailureReason::TimeoutAtShutdown),
            Some(&2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_pool_refuses_work() {
        let (mut pool, _metrics) = pool(1, 2);
        pool.shutdown(Duration::from_millis(1)).await;
        assert_eq!(
            pool.try_dispatch(slow_success(Duration::ZERO)),
            Err(DispatchError::Closed)
        );
    }

    async fn panicking() -> OperationOutcome {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicked_task_frees_slot_and_maps_to_orchestration_error() {
        let (mut pool, metrics) = pool(1, 1);
        pool.try_dispatch(panicking()).unwrap();

        let stats = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(stats.timed_out_at_shutdown, 0);
        assert_eq!(metrics.snapshot().operations_total, 0);

        let mut tasks = JoinSet::new();
        tasks.spawn(panicking());
        let err = tasks.join_next().await.unwrap().unwrap_err();
        let failure = join_failure(&err).unwrap();
        assert_eq!(failure.kind, crate::error::BenchErrorKind::Orchestration);
        assert!(failure.message.contains("panicked"));

        let mut tasks: JoinSet<()> = JoinSet::new();
        tasks.spawn(std::future::pending::<()>());
        tasks.abort_all();
        let cancelled = tasks.join_next().await.unwrap().unwrap_err();
        assert!(join_failure(&cancelled).is_none());
    }
}
