//! Scheduler module for concurrent row classification.
//!
//! This module provides:
//! - **Pool**: Admits pending rows in input order with at most N in flight,
//!   applies task outcomes to the store from a single coordinator.
//! - **Retry policy**: Exponential backoff with jitter for transient failures.
//! - **Rate limiting**: Coordinated backoff when the service asks callers to slow down.
//!
//! # Example
//!
//! ```ignore
//! use floodnel::scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(classifier, SchedulerConfig::default().with_max_concurrent(4));
//! let report = scheduler.run(&mut store, queue, &mut checkpoint, &cancel, None).await?;
//! ```

mod pool;
mod rate_limit;
mod retry;

pub use pool::{RowEvent, Scheduler, SchedulerConfig, SchedulerReport, StopReason};
pub use rate_limit::{RateLimitState, SharedRateLimit};
pub use retry::RetryPolicy;
