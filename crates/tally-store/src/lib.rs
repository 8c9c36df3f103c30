//! Authoritative metric storage for the tally server.
#![forbid(unsafe_code)]
//!
//! - [`Repository`]: the capability the ingestion and persistence layers depend on
//! - [`MetricStore`]: the in-memory, concurrency-safe implementation
//! - [`SnapshotPersister`]: periodic append-only snapshots to `metrics.bk`
//! - [`DurablePersister`]: periodic upserts into PostgreSQL, with hydration on startup
//!
//! Gauges keep the last written value; counters keep the running total of
//! every delta received. A name belongs to one kind for the lifetime of the
//! store: an update of the other kind is rejected as a type conflict.
//!
//! # Example
//!
//! ```rust
//! use tally_store::{MetricStore, Repository};
//!
//! let store = MetricStore::new();
//! store.update_counter("PollCount", 10).unwrap();
//! store.update_counter("PollCount", 10).unwrap();
//! assert_eq!(store.receive_counter("PollCount"), Some(20));
//! assert_eq!(store.receive_gauge("Alloc"), None);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod database;
pub mod error;
pub mod memory;
pub mod repository;
pub mod snapshot;

pub use database::{DurablePersister, TRANSIENT_SQLSTATES, is_transient_sqlstate};
pub use error::{Result, StoreError};
pub use memory::MetricStore;
pub use repository::{Repository, Snapshot, replay};
pub use snapshot::{BACKUP_FILE_NAME, SnapshotPersister};
