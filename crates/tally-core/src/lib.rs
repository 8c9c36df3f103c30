//! Shared building blocks for the tally metrics pipeline.
#![forbid(unsafe_code)]
//!
//! `tally-core` holds everything the agent and the server agree on:
//!
//! - **Metric model**: [`MetricKind`], [`MetricSample`] and [`MetricBatch`]
//! - **Wire formats**: the HTTP JSON shape ([`Metrics`]) and the RPC frames in [`protocol`]
//! - **Compression**: gzip helpers in [`codec`]
//! - **Delivery primitives**: [`RetryExecutor`] with a fixed [`RetrySchedule`],
//!   and the [`RateLimiter`] concurrency gate
//! - **Scheduling**: [`schedule::run_every`] for cancellable periodic tasks
//!
//! # Example
//!
//! ```rust
//! use tally_core::{MetricBatch, MetricKind};
//!
//! let batch = MetricBatch::new([("Alloc".to_string(), 1024.0)], 5);
//! assert_eq!(batch.len(), 2);
//! assert_eq!(batch.samples()[1].kind(), MetricKind::Counter);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod codec;
pub mod error;
pub mod limiter;
pub mod metric;
pub mod protocol;
pub mod retry;
pub mod schedule;

pub use error::{CoreError, Result};
pub use limiter::{RateLimitPermit, RateLimiter};
pub use metric::{MetricBatch, MetricKind, MetricSample, MetricValue, Metrics, POLL_COUNT};
pub use retry::{RetryExecutor, RetrySchedule, Retryable};
