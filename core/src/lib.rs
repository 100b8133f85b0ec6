//! soak-bench-core: rate-controlled load generation and metrics
//!
//! This crate holds everything a soak test needs apart from the wire
//! protocols and credential sources, which plug in through traits:
//!
//! - Configuration and worker-pool sizing
//! - Constant-arrival-rate scheduling with ramp-up
//! - A bounded worker pool with grace-period drain
//! - Operation execution (publish batches or streaming sessions)
//! - Concurrent metrics aggregation (counters, rates, HDR trends)
//! - The setup -> load -> teardown lifecycle and its report

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod traits;
pub mod worker;

pub use config::{
    format_duration, parse_duration, ConfigError, CredentialSource, LoadMode, TestConfig,
    Thresholds, WorkerPoolSizing,
};
pub use connection::{ConnectionEvent, ConnectionState, StreamSession};
pub use error::*;
pub use metrics::{MetricsAggregator, MetricsSnapshot, TrendSummary};
pub use orchestrator::{SoakTest, SoakTestBuilder, TestReport, TestSummary, ThresholdResult};
pub use request::*;
pub use response::*;
pub use traits::*;
pub use worker::{ArrivalSchedule, ExecutorBuilder, OperationExecutor, WorkerPool};
