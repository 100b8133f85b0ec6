//! Soak test lifecycle management
//!
//! A [`SoakTest`] coordinates one run:
//! - setup: one credential and one read-only probe of the target
//! - load: the scheduler dispatches into the worker pool for the configured
//!   duration (or until Ctrl+C)
//! - teardown: drain the pool, take one metrics snapshot, evaluate thresholds
//!
//! # Example
//!
//! ```ignore
//! use soak_bench_core::SoakTestBuilder;
//!
//! let test = SoakTestBuilder::new()
//!     .config(config)
//!     .transport(transport)
//!     .token_provider(auth)
//!     .build()?;
//!
//! let report = test.run_with_signal_handling().await;
//! println!("{report}");
//! ```

mod builder;
mod executor;
mod summary;

pub use builder::SoakTestBuilder;
pub use executor::SoakTest;
pub use summary::{TestReport, TestSummary, ThresholdResult};
