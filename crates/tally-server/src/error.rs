//! Error types for the tally server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_core::CoreError;
use tally_core::protocol::codes;
use tally_integrity::IntegrityError;
use tally_store::StoreError;
use thiserror::Error;
use tracing::warn;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while configuring or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, std::io::Error),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed request.
    #[error("{0}")]
    InvalidRequest(String),

    /// The requested metric does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Metric validation failed.
    #[error(transparent)]
    Metric(#[from] CoreError),

    /// Signature, decryption or origin check failed.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// The store rejected the update or persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Store(StoreError::TypeConflict { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Metric(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Metric(CoreError::Serialization(_) | CoreError::PayloadEncoding { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Integrity(e) if e.is_forbidden() => StatusCode::FORBIDDEN,
            Self::Integrity(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// RPC error code this error maps to.
    #[must_use]
    pub fn rpc_code(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => codes::INVALID_ARGUMENT,
            StatusCode::FORBIDDEN => codes::PERMISSION_DENIED,
            StatusCode::NOT_FOUND => codes::NOT_FOUND,
            _ => codes::INTERNAL,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }

        (
            status,
            [("content-type", "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("invalid json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::net::{IpAddr, Ipv4Addr};
    use tally_core::MetricKind;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn not_found_is_plain_text() {
        let response = ServerError::NotFound("metric not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "metric not found");
    }

    #[test]
    fn type_conflict_is_bad_request() {
        let err = ServerError::from(StoreError::TypeConflict {
            name: "Alloc".to_string(),
            stored: MetricKind::Gauge,
            incoming: MetricKind::Counter,
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.rpc_code(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn unknown_kind_is_bad_request() {
        let err = ServerError::from(CoreError::UnknownKind {
            kind: "histogram".to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "invalid metric type: histogram");
    }

    #[test]
    fn origin_rejection_is_forbidden() {
        let err = ServerError::from(IntegrityError::UntrustedOrigin {
            ip: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.rpc_code(), codes::PERMISSION_DENIED);
    }

    #[test]
    fn signature_mismatch_is_bad_request() {
        let err = ServerError::from(IntegrityError::InvalidSignature);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_timeout_is_internal() {
        let err = ServerError::from(StoreError::Timeout { operation: "ping" });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.rpc_code(), codes::INTERNAL);
    }

    #[test]
    fn bind_failed_mentions_address() {
        let err = ServerError::BindFailed(
            "localhost:8080".to_string(),
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(err.to_string().contains("localhost:8080"));
    }
}
