//! End-of-run summary, thresholds and report rendering

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Thresholds, TestConfig};
use crate::error::FailureReason;
use crate::metrics::MetricsSnapshot;
use crate::worker::PoolStats;

/// One threshold check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    /// Threshold name, e.g. `p95_latency_ms`
    pub name: String,
    /// Comparison, `<=` or `>=`
    pub comparison: String,
    /// Configured limit
    pub limit: f64,
    /// Observed value; `None` when there was nothing to measure
    pub actual: Option<f64>,
    /// Observed value satisfies the limit (never true without a value)
    pub passed: bool,
}

impl ThresholdResult {
    fn at_most(name: &str, limit: f64, actual: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            comparison: "<=".to_string(),
            limit,
            actual,
            passed: actual.is_some_and(|v| v <= limit),
        }
    }

    fn at_least(name: &str, limit: f64, actual: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            comparison: ">=".to_string(),
            limit,
            actual,
            passed: actual.is_some_and(|v| v >= limit),
        }
    }
}

/// Statistics reported at the end of a completed run
///
/// Every figure comes from a single metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    /// Target resource
    pub target: String,
    /// Target messages per second
    pub target_rate: f64,
    /// Messages sent per second of dispatch window
    pub achieved_rate: f64,
    /// `achieved_rate / target_rate` as a percentage
    pub achieved_pct: f64,
    /// Dispatch window actually used (seconds)
    pub elapsed_secs: f64,
    /// Dispatch stopped early on a shutdown signal
    pub interrupted: bool,
    /// Operations that produced an outcome
    pub operations: u64,
    /// Messages carried by successful operations
    pub total_sent: u64,
    /// Units the target acknowledged or delivered
    pub total_acknowledged: u64,
    /// Failed operations
    pub total_failed: u64,
    /// Dispatches dropped for lack of worker capacity
    pub scheduling_misses: u64,
    /// Successful / total operations
    pub success_rate: Option<f64>,
    /// Mean latency of successful operations
    pub avg_latency_ms: Option<f64>,
    /// p95 latency of successful operations
    pub p95_latency_ms: Option<f64>,
    /// Failed operations by reason
    pub failures: BTreeMap<FailureReason, u64>,
    /// Worker pool figures
    pub pool: PoolStats,
    /// Threshold results (empty when none are configured or evaluation is disabled)
    pub thresholds: Vec<ThresholdResult>,
    /// The full snapshot the summary was derived from
    pub metrics: MetricsSnapshot,
}

impl TestSummary {
    /// Derive the summary from a snapshot
    pub fn from_snapshot(
        config: &TestConfig,
        metrics: MetricsSnapshot,
        elapsed: Duration,
        interrupted: bool,
        pool: PoolStats,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let achieved_rate = if elapsed_secs > 0.0 {
            metrics.messages_sent as f64 / elapsed_secs
        } else {
            0.0
        };
        let achieved_pct = if config.target_rate > 0.0 {
            achieved_rate / config.target_rate * 100.0
        } else {
            0.0
        };

        Self {
            target: config.target.clone(),
            target_rate: config.target_rate,
            achieved_rate,
            achieved_pct,
            elapsed_secs,
            interrupted,
            operations: metrics.operations_total,
            total_sent: metrics.messages_sent,
            total_acknowledged: metrics.messages_acknowledged,
            total_failed: metrics.operations_failed,
            scheduling_misses: metrics.scheduling_misses,
            success_rate: metrics.success_rate,
            avg_latency_ms: metrics.latency_ms.map(|t| t.mean),
            p95_latency_ms: metrics.latency_ms.map(|t| t.p95),
            failures: metrics.failures.clone(),
            pool,
            thresholds: Vec::new(),
            metrics,
        }
    }

    /// Check the configured thresholds and store the results
    pub fn evaluate_thresholds(&mut self, thresholds: &Thresholds) {
        let mut results = Vec::new();
        if let Some(limit) = thresholds.max_p95_latency_ms {
            results.push(ThresholdResult::at_most(
                "p95_latency_ms",
                limit,
                self.p95_latency_ms,
            ));
        }
        if let Some(limit) = thresholds.min_success_rate {
            results.push(ThresholdResult::at_least(
                "success_rate",
                limit,
                self.success_rate,
            ));
        }
        if let Some(limit) = thresholds.min_achieved_pct {
            results.push(ThresholdResult::at_least(
                "achieved_pct",
                limit,
                Some(self.achieved_pct),
            ));
        }
        self.thresholds = results;
    }

    /// True unless some evaluated threshold failed
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }
}

/// Final outcome of a soak test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestReport {
    /// Setup succeeded and the load phase ran
    Completed(TestSummary),
    /// Setup failed; no operation was dispatched
    ConnectionUnsuccessful {
        /// Target resource
        target: String,
        /// What failed during setup
        reason: String,
    },
}

impl TestReport {
    /// The summary, when the run completed
    pub fn summary(&self) -> Option<&TestSummary> {
        match self {
            TestReport::Completed(summary) => Some(summary),
            TestReport::ConnectionUnsuccessful { .. } => None,
        }
    }

    /// Setup failed
    pub fn is_connection_unsuccessful(&self) -> bool {
        matches!(self, TestReport::ConnectionUnsuccessful { .. })
    }
}

struct Opt(Option<f64>, u8, &'static str);

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.*}{}", self.1 as usize, v, self.2),
            None => f.write_str("N/A"),
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestReport::ConnectionUnsuccessful { target, reason } => {
                writeln!(f, "==== Soak test: connection unsuccessful ====")?;
                writeln!(f, "Target:            {target}")?;
                writeln!(f, "Reason:            {reason}")?;
                writeln!(f, "No operations were dispatched.")
            }
            TestReport::Completed(s) => {
                writeln!(f, "==== Soak test summary ====")?;
                writeln!(f, "Target:            {}", s.target)?;
                if s.interrupted {
                    writeln!(f, "Run interrupted after {:.1}s", s.elapsed_secs)?;
                }
                writeln!(f, "Target rate:       {:.2} msg/s", s.target_rate)?;
                writeln!(
                    f,
                    "Achieved rate:     {:.2} msg/s ({:.1}%)",
                    s.achieved_rate, s.achieved_pct
                )?;
                writeln!(f, "Total sent:        {}", s.total_sent)?;
                writeln!(f, "Total failed:      {}", s.total_failed)?;
                writeln!(
                    f,
                    "Success rate:      {}",
                    Opt(s.success_rate.map(|r| r * 100.0), 2, "%")
                )?;
                writeln!(f, "Avg latency:       {}", Opt(s.avg_latency_ms, 2, " ms"))?;
                writeln!(f, "p95 latency:       {}", Opt(s.p95_latency_ms, 2, " ms"))?;
                writeln!(f, "Scheduling misses: {}", s.scheduling_misses)?;
                writeln!(
                    f,
                    "Workers:           {} preallocated, {} max, {} peak",
                    s.pool.preallocated, s.pool.max_workers, s.pool.peak_in_flight
                )?;

                if !s.failures.is_empty() {
                    writeln!(f, "Failures:")?;
                    for (reason, count) in &s.failures {
                        writeln!(f, "  {reason:<28} {count}")?;
                    }
                }

                if !s.thresholds.is_empty() {
                    writeln!(f, "Thresholds:")?;
                    for t in &s.thresholds {
                        writeln!(
                            f,
                            "  [{}] {} {} {} (actual {})",
                            if t.passed { "PASS" } else { "FAIL" },
                            t.name,
                            t.comparison,
                            t.limit,
                            Opt(t.actual, 2, "")
                        )?;
                    }
                }
                Ok(())
            }
        }
    }
}
