//! Error types for the agent.

use tally_core::{CoreError, Retryable};
use tally_integrity::IntegrityError;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while collecting or delivering metrics.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The server could not be reached, or the connection broke mid-call.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with a non-success HTTP status.
    #[error("server responded {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The server answered an RPC call with an error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Signing or encryption failed.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Encoding, compression or rate limiting failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A delivery task panicked or was aborted.
    #[error("delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Retryable for AgentError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Status { status, .. } => (500..=504).contains(status),
            Self::Rpc { code, .. } => code == tally_core::protocol::codes::INTERNAL,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn status(code: u16) -> AgentError {
        AgentError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test_case(500 ; "internal server error")]
    #[test_case(502 ; "bad gateway")]
    #[test_case(503 ; "service unavailable")]
    #[test_case(504 ; "gateway timeout")]
    fn server_errors_retry(code: u16) {
        assert!(status(code).is_retryable());
    }

    #[test_case(400 ; "bad request")]
    #[test_case(403 ; "forbidden")]
    #[test_case(404 ; "not found")]
    #[test_case(505 ; "http version not supported")]
    fn other_statuses_are_terminal(code: u16) {
        assert!(!status(code).is_retryable());
    }

    #[test]
    fn connection_errors_retry() {
        assert!(AgentError::Connection("refused".to_string()).is_retryable());
    }

    #[test]
    fn rpc_codes() {
        let internal = AgentError::Rpc {
            code: "internal".to_string(),
            message: "db down".to_string(),
        };
        let denied = AgentError::Rpc {
            code: "permission_denied".to_string(),
            message: "no".to_string(),
        };
        assert!(internal.is_retryable());
        assert!(!denied.is_retryable());
    }

    #[test]
    fn display() {
        assert_eq!(status(503).to_string(), "server responded 503: ");
        assert!(!AgentError::Config("x".to_string()).is_retryable());
    }
}
