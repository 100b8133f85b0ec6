//! Soak test lifecycle: setup -> load -> teardown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{TestConfig, WorkerPoolSizing};
use crate::error::BenchResult;
use crate::metrics::MetricsAggregator;
use crate::worker::{
    ArrivalSchedule, DispatchStats, OperationExecutor, PoolStats, Scheduler, WorkerPool,
};

use super::summary::{TestReport, TestSummary};

/// One soak test run
///
/// Owns the configuration, the shared executor and the aggregator the run
/// records into. Ctrl+C and [`SoakTest::shutdown`] stop dispatch early; the
/// pool still drains and the run still reports.
pub struct SoakTest {
    /// Test configuration
    pub(crate) config: TestConfig,

    /// Operation executor (shared across in-flight operations)
    pub(crate) executor: Arc<OperationExecutor>,

    /// Aggregates for this run
    pub(crate) metrics: Arc<MetricsAggregator>,

    /// Shutdown signal sender
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl SoakTest {
    /// Create a test
    ///
    /// Use `SoakTestBuilder` for validated construction.
    pub fn new(
        config: TestConfig,
        executor: Arc<OperationExecutor>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            executor,
            metrics,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop dispatching early
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get the test configuration
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// The aggregator this run records into
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Acquire one credential and probe the target once
    pub async fn setup(&self) -> BenchResult<()> {
        tracing::info!(
            target_resource = %self.config.target,
            workload = self.executor.workload().name(),
            "Checking connectivity"
        );

        let credential = self.executor.initial_credential().await?;
        self.executor.probe(&credential).await?;

        tracing::info!(target_resource = %self.config.target, "Connectivity check passed");
        Ok(())
    }

    /// Run the whole lifecycle and produce the report
    ///
    /// A setup failure yields [`TestReport::ConnectionUnsuccessful`] without
    /// dispatching anything.
    pub async fn run(&self) -> TestReport {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if let Err(e) = self.setup().await {
            tracing::error!(
                target_resource = %self.config.target,
                error = %e,
                "Setup failed, not starting load"
            );
            return TestReport::ConnectionUnsuccessful {
                target: self.config.target.clone(),
                reason: e.message,
            };
        }

        let (dispatch, pool) = self.run_load(&mut shutdown_rx).await;
        TestReport::Completed(self.teardown(&dispatch, pool))
    }

    async fn run_load(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> (DispatchStats, PoolStats) {
        let sizing = WorkerPoolSizing::from_config(&self.config);
        let schedule = ArrivalSchedule::from_config(&self.config);
        let scheduler = Scheduler::new(schedule, self.config.duration);
        let mut pool = WorkerPool::new(sizing, Arc::clone(&self.metrics));

        tracing::info!(
            target_rate = self.config.target_rate,
            batch_size = self.config.batch_size,
            operation_rate = schedule.rate(),
            preallocated = sizing.preallocated,
            max_workers = sizing.max_workers,
            duration_secs = self.config.duration.as_secs_f64(),
            ramp_up_secs = self.config.ramp_up.as_secs_f64(),
            "Starting soak test"
        );

        let progress = self.spawn_progress();

        let executor = Arc::clone(&self.executor);
        let dispatch = scheduler
            .run(
                &mut pool,
                &self.metrics,
                move |op_id| {
                    let executor = Arc::clone(&executor);
                    async move { executor.execute(op_id).await }
                },
                shutdown_rx,
            )
            .await;

        tracing::info!(
            dispatched = dispatch.dispatched,
            scheduling_misses = dispatch.scheduling_misses,
            in_flight = pool.in_flight(),
            interrupted = dispatch.interrupted,
            "Dispatch finished, draining in-flight operations"
        );

        let pool_stats = pool.shutdown(self.config.shutdown_grace).await;

        if let Some(handle) = progress {
            handle.abort();
        }

        (dispatch, pool_stats)
    }

    fn spawn_progress(&self) -> Option<JoinHandle<()>> {
        let period = self.config.progress_interval;
        if period.is_zero() {
            return None;
        }

        let metrics = Arc::clone(&self.metrics);
        let target_rate = self.config.target_rate;
        Some(tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval_at(start + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let p = metrics.progress();
                let elapsed = start.elapsed().as_secs_f64();
                tracing::info!(
                    elapsed_secs = elapsed.round(),
                    operations = p.operations,
                    failed = p.failed,
                    messages_sent = p.messages_sent,
                    scheduling_misses = p.scheduling_misses,
                    current_rate = p.messages_sent as f64 / elapsed,
                    target_rate,
                    "Progress"
                );
            }
        }))
    }

    fn teardown(&self, dispatch: &DispatchStats, pool: PoolStats) -> TestSummary {
        let snapshot = self.metrics.snapshot();
        let elapsed = dispatch.elapsed().unwrap_or(Duration::ZERO);

        let mut summary =
            TestSummary::from_snapshot(&self.config, snapshot, elapsed, dispatch.interrupted, pool);

        if self.config.thresholds_disabled {
            tracing::warn!("Threshold evaluation disabled");
        } else {
            summary.evaluate_thresholds(&self.config.thresholds);
        }

        tracing::info!(
            operations = summary.operations,
            total_sent = summary.total_sent,
            total_failed = summary.total_failed,
            achieved_rate = summary.achieved_rate,
            achieved_pct = summary.achieved_pct,
            success_rate = summary.success_rate,
            p95_latency_ms = summary.p95_latency_ms,
            "Soak test completed"
        );
        for t in summary.thresholds.iter().filter(|t| !t.passed) {
            tracing::warn!(
                threshold = %t.name,
                limit = t.limit,
                actual = t.actual,
                "Threshold breached"
            );
        }

        summary
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C stops dispatch; in-flight work drains and the run reports.
    pub async fn run_with_signal_handling(&self) -> TestReport {
        let shutdown_tx = self.shutdown_tx.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, stopping dispatch...");
                    let _ = shutdown_tx.send(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let report = self.run().await;

        signal_handle.abort();

        report
    }
}

impl std::fmt::Debug for SoakTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoakTest")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}
