//! Streaming metrics: counters, rates and trends
//!
//! Every primitive here is written to by many workers at once. Counters and
//! rates are plain atomics; trends spread writes over several histogram
//! shards so that concurrent writers rarely contend on the same lock.
//!
//! [`MetricsAggregator::snapshot`] is the single read point. Writers hold a
//! shared guard on the aggregator's gate while they record, the snapshot
//! holds the exclusive guard, so a snapshot never observes half of an
//! outcome.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult, FailureReason};
use crate::response::OperationOutcome;

const TREND_SHARDS: usize = 16;
const SIGNIFICANT_DIGITS: u8 = 3;

/// Monotonically increasing total
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Add one
    pub fn incr(&self) {
        self.add(1);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fraction of boolean observations that were true
#[derive(Debug, Default)]
pub struct Rate {
    trues: AtomicU64,
    total: AtomicU64,
}

impl Rate {
    /// Create an empty rate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation
    pub fn observe(&self, value: bool) {
        if value {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Observations so far
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// True observations so far
    pub fn trues(&self) -> u64 {
        self.trues.load(Ordering::Relaxed)
    }

    /// `trues / total`, or `None` before the first observation
    pub fn value(&self) -> Option<f64> {
        ratio(self.trues(), self.total())
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// Distribution summary (same unit as the recorded values)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// Number of observations
    pub count: u64,
    /// Minimum
    pub min: f64,
    /// Exact arithmetic mean
    pub mean: f64,
    /// Median
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum
    pub max: f64,
}

/// Streaming numeric distribution with percentile queries
///
/// Values are stored as fixed-point integers (`value * scale`) in HDR
/// histograms with three significant digits. The mean is kept exactly.
pub struct Trend {
    shards: Vec<Mutex<Histogram<u64>>>,
    next_shard: AtomicUsize,
    scaled_sum: AtomicU64,
    scale: f64,
}

impl Trend {
    /// Create a trend that resolves `1 / scale` and tracks values up to `max`
    pub fn new(scale: f64, max: f64) -> BenchResult<Self> {
        let highest = ((max * scale).ceil() as u64).max(2);
        let shards = (0..TREND_SHARDS)
            .map(|_| {
                Histogram::new_with_bounds(1, highest, SIGNIFICANT_DIGITS)
                    .map(Mutex::new)
                    .map_err(|e| BenchError::metrics(format!("histogram bounds: {e:?}")))
            })
            .collect::<BenchResult<Vec<_>>>()?;

        Ok(Self {
            shards,
            next_shard: AtomicUsize::new(0),
            scaled_sum: AtomicU64::new(0),
            scale,
        })
    }

    /// Latency trend in milliseconds, microsecond resolution, up to one hour
    pub fn latency_ms() -> BenchResult<Self> {
        Self::new(1000.0, 3_600_000.0)
    }

    /// Byte-size trend, up to 1 GiB
    pub fn bytes() -> BenchResult<Self> {
        Self::new(1.0, (1u64 << 30) as f64)
    }

    /// Record one observation; negative values clamp to zero
    pub fn record(&self, value: f64) {
        let scaled = (value.max(0.0) * self.scale).round() as u64;
        let idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[idx].lock().saturating_record(scaled);
        self.scaled_sum.fetch_add(scaled, Ordering::Relaxed);
    }

    /// Observations so far
    pub fn count(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Merge the shards and summarize; `None` when empty
    pub fn summary(&self) -> Option<TrendSummary> {
        let mut merged: Option<Histogram<u64>> = None;
        for shard in &self.shards {
            let shard = shard.lock();
            match merged.as_mut() {
                None => merged = Some(shard.clone()),
                Some(m) => {
                    if let Err(e) = m.add(&*shard) {
                        tracing::warn!(error = ?e, "Dropping trend shard that failed to merge");
                    }
                }
            }
        }

        let merged = merged?;
        if merged.is_empty() {
            return None;
        }

        let count = merged.len();
        let unscale = |v: u64| v as f64 / self.scale;
        let mean = self.scaled_sum.load(Ordering::Relaxed) as f64 / count as f64 / self.scale;

        Some(TrendSummary {
            count,
            min: unscale(merged.min()),
            mean,
            p50: unscale(merged.value_at_quantile(0.50)),
            p90: unscale(merged.value_at_quantile(0.90)),
            p95: unscale(merged.value_at_quantile(0.95)),
            p99: unscale(merged.value_at_quantile(0.99)),
            max: unscale(merged.max()),
        })
    }
}

impl std::fmt::Debug for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trend")
            .field("shards", &self.shards.len())
            .field("scale", &self.scale)
            .finish()
    }
}

/// Point-in-time view of every aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Operations that produced an outcome
    pub operations_total: u64,
    /// Operations that passed every check
    pub operations_succeeded: u64,
    /// Operations that failed
    pub operations_failed: u64,
    /// Messages carried by successful operations
    pub messages_sent: u64,
    /// Units the target acknowledged or delivered
    pub messages_acknowledged: u64,
    /// Dispatches dropped because every worker slot was busy
    pub scheduling_misses: u64,
    /// Failed operations by reason (only non-zero entries)
    pub failures: BTreeMap<FailureReason, u64>,
    /// Successful / total operations
    pub success_rate: Option<f64>,
    /// Latency of successful operations (ms)
    pub latency_ms: Option<TrendSummary>,
    /// Payload size of successful operations (bytes)
    pub payload_bytes: Option<TrendSummary>,
}

/// Running totals for progress logging
///
/// Read without the gate, so the fields may be very slightly out of step
/// with each other. Use [`MetricsAggregator::snapshot`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Operations finished
    pub operations: u64,
    /// Operations failed
    pub failed: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Scheduling misses
    pub scheduling_misses: u64,
}

/// Process-wide aggregates for one test run
///
/// Create one per run and share it through an `Arc`.
#[derive(Debug)]
pub struct MetricsAggregator {
    gate: RwLock<()>,
    operations_total: Counter,
    operations_succeeded: Counter,
    operations_failed: Counter,
    messages_sent: Counter,
    messages_acknowledged: Counter,
    scheduling_misses: Counter,
    failures: [Counter; FailureReason::ALL.len()],
    success_rate: Rate,
    latency_ms: Trend,
    payload_bytes: Trend,
}

impl MetricsAggregator {
    /// Create an empty aggregator
    pub fn new() -> BenchResult<Self> {
        Ok(Self {
            gate: RwLock::new(()),
            operations_total: Counter::new(),
            operations_succeeded: Counter::new(),
            operations_failed: Counter::new(),
            messages_sent: Counter::new(),
            messages_acknowledged: Counter::new(),
            scheduling_misses: Counter::new(),
            failures: Default::default(),
            success_rate: Rate::new(),
            latency_ms: Trend::latency_ms()?,
            payload_bytes: Trend::bytes()?,
        })
    }

    /// Fold one outcome into the aggregates
    pub fn record(&self, outcome: &OperationOutcome) {
        let _guard = self.gate.read();

        self.operations_total.incr();
        self.success_rate.observe(outcome.success);

        if outcome.success {
            self.operations_succeeded.incr();
            self.messages_sent.add(outcome.messages as u64);
            self.messages_acknowledged.add(outcome.accepted as u64);
            if let Some(latency) = outcome.latency_ms {
                self.latency_ms.record(latency);
            }
            self.payload_bytes.record(outcome.payload_bytes as f64);
        } else {
            self.operations_failed.incr();
            if let Some(reason) = outcome.failure {
                self.failures[reason.index()].incr();
            }
        }
    }

    /// Count a dispatch dropped for lack of capacity
    pub fn record_scheduling_miss(&self) {
        let _guard = self.gate.read();
        self.scheduling_misses.incr();
    }

    /// Approximate running totals
    pub fn progress(&self) -> Progress {
        Progress {
            operations: self.operations_total.get(),
            failed: self.operations_failed.get(),
            messages_sent: self.messages_sent.get(),
            scheduling_misses: self.scheduling_misses.get(),
        }
    }

    /// Consistent, non-destructive read of every aggregate
    pub fn snapshot(&self) -> MetricsSnapshot {
        let _guard = self.gate.write();

        let failures = FailureReason::ALL
            .iter()
            .map(|r| (*r, self.failures[r.index()].get()))
            .filter(|(_, n)| *n > 0)
            .collect();

        MetricsSnapshot {
            operations_total: self.operations_total.get(),
            operations_succeeded: self.operations_succeeded.get(),
            operations_failed: self.operations_failed.get(),
            messages_sent: self.messages_sent.get(),
            messages_acknowledged: self.messages_acknowledged.get(),
            scheduling_misses: self.scheduling_misses.get(),
            failures,
            success_rate: self.success_rate.value(),
            latency_ms: self.latency_ms.summary(),
            payload_bytes: self.payload_bytes.summary(),
        }
    }
}
