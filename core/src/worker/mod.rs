//! Load generation: scheduling, pooling and executing operations
//!
//! The load model is constant arrival rate, not constant concurrency. A
//! single [`Scheduler`] decides when each operation starts; the
//! [`WorkerPool`] bounds how many run at once; the [`OperationExecutor`]
//! does the work of one operation and turns whatever happens into an
//! [`OperationOutcome`](crate::response::OperationOutcome).
//!
//! 1. The scheduler waits for the next arrival on the [`ArrivalSchedule`]
//! 2. It asks the pool for a slot; a full pool turns the tick into a
//!    scheduling miss, nothing is queued
//! 3. The pool spawns the operation as a tokio task
//! 4. The executor generates a payload, acquires a credential, calls the
//!    transport and validates the response
//! 5. The outcome is folded into the shared metrics aggregator
//!
//! # Example
//!
//! ```ignore
//! use soak_bench_core::worker::{ArrivalSchedule, ExecutorBuilder, Scheduler, WorkerPool};
//!
//! let executor = Arc::new(
//!     ExecutorBuilder::new()
//!         .config(&config)
//!         .transport(transport)
//!         .token_provider(auth)
//!         .build()?,
//! );
//! let mut pool = WorkerPool::new(WorkerPoolSizing::from_config(&config), metrics.clone());
//! let scheduler = Scheduler::new(ArrivalSchedule::from_config(&config), config.duration);
//!
//! let stats = scheduler
//!     .run(&mut pool, &metrics, |n| {
//!         let executor = Arc::clone(&executor);
//!         async move { executor.execute(n).await }
//!     }, &mut shutdown_rx)
//!     .await;
//! let pool_stats = pool.shutdown(config.shutdown_grace).await;
//! ```

mod builder;
mod executor;
mod pool;
mod scheduler;
mod stats;

pub use builder::ExecutorBuilder;
pub use executor::{OperationExecutor, Workload};
pub use pool::{DispatchError, WorkerPool};
pub use scheduler::{ArrivalSchedule, Scheduler};
pub use stats::{DispatchStats, PoolStats};

#[cfg(test)]
mod tests;
