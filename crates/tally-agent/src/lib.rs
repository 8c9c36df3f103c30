//! # tally-agent
//!
//! Samples process and host gauges and pushes them to a tally server.
//!
//! ## Features
//!
//! - **Independent loops**: sampling and reporting run on their own timers
//! - **Two transports**: gzip JSON over HTTP, or `metrics.send` calls over a
//!   WebSocket RPC connection
//! - **Integrity**: optional HMAC-SHA256 signatures and RSA payload encryption
//! - **Delivery**: bounded concurrency and a fixed retry schedule for
//!   transient failures; undelivered poll counts are carried into the next batch
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tally_agent::AgentConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AgentConfig::new("localhost:8080")
//!         .with_report_interval(Duration::from_secs(5))
//!         .with_hash_key("secret");
//!     let cancel = CancellationToken::new();
//!     // tally_agent::run(config, cancel).await.unwrap();
//! #   let _ = (config, cancel);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod reporter;
pub mod rpc;
pub mod sampler;

pub use agent::{run, run_with};
pub use collector::MetricSet;
pub use config::{AgentConfig, Args};
pub use error::{AgentError, AgentResult};
pub use http::HttpTransport;
pub use reporter::{Envelope, Reporter, Transport};
pub use rpc::RpcTransport;
pub use sampler::{Sampler, SystemSampler};
