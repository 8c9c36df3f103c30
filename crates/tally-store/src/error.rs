//! Error types for the metric store and its persisters.

use std::path::PathBuf;

use tally_core::{MetricKind, Retryable};
use thiserror::Error;

use crate::database::is_transient_sqlstate;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The name is already stored under the other kind.
    #[error("metric {name} is a {stored}, cannot update it as a {incoming}")]
    TypeConflict {
        /// Metric name.
        name: String,
        /// Kind already in the store.
        stored: MetricKind,
        /// Kind of the rejected update.
        incoming: MetricKind,
    },

    /// Backup file I/O failed.
    #[error("backup file {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database driver reported an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database statement exceeded its deadline.
    #[error("database {operation} timed out")]
    Timeout {
        /// What was running.
        operation: &'static str,
    },
}

impl StoreError {
    /// Returns the SQLSTATE code carried by a database error, if any.
    #[must_use]
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }
}

impl Retryable for StoreError {
    /// Only database errors with a known transient SQLSTATE are retried.
    fn is_retryable(&self) -> bool {
        self.sqlstate().as_deref().is_some_and(is_transient_sqlstate)
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
