//! # tally-server
//!
//! Receives metric batches from agents and keeps the authoritative store.
//!
//! ## Features
//!
//! - **HTTP API**: single and batch updates, value lookups and an HTML overview,
//!   with gzip in both directions
//! - **RPC**: JSON frames over WebSocket sharing the same store and checks
//! - **Integrity**: HMAC-SHA256 signatures, RSA payload decryption and a
//!   trusted-subnet filter, applied in one place by [`Gatekeeper`]
//! - **Persistence**: append-only snapshots or PostgreSQL, restored before serving
//!
//! ## Example
//!
//! ```rust,no_run
//! use tally_server::{MetricsServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::new("0.0.0.0:8080").with_file_storage_path(None);
//!     let cancel = CancellationToken::new();
//!     // MetricsServer::new(config).run(cancel).await.unwrap();
//! #   let _ = (config, cancel);
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/` | GET | HTML table of every metric |
//! | `/update/` | POST | One metric as JSON |
//! | `/update/{type}/{name}/{value}` | POST | One metric in the path |
//! | `/updates/` | POST | JSON batch, applied atomically |
//! | `/value/` | POST | Look up one metric as JSON |
//! | `/value/{type}/{name}` | GET | Plain-text value |
//! | `/ping` | GET | Database reachability |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod ingest;
pub mod routes;
pub mod rpc;
pub mod server;
pub mod state;

pub use config::{Args, ServerConfig, StorageKind};
pub use error::{ServerError, ServerResult};
pub use guard::Gatekeeper;
pub use routes::create_router;
pub use rpc::RpcServer;
pub use server::{MetricsServer, Persistence};
pub use state::{AppState, SharedState};
