//! Error types for the shared metric model and delivery primitives.

use thiserror::Error;

/// Errors produced by `tally-core`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The metric type is neither `gauge` nor `counter`.
    #[error("invalid metric type: {kind}")]
    UnknownKind {
        /// The type string that was received.
        kind: String,
    },

    /// The metric carries no name.
    #[error("empty metric name")]
    EmptyName,

    /// The value field matching the metric kind is absent.
    #[error("metric {name} has no {field}")]
    MissingField {
        /// Metric name.
        name: String,
        /// The missing field (`value` or `delta`).
        field: &'static str,
    },

    /// Gzip compression or decompression failed.
    #[error("compression failed: {reason}")]
    Compression {
        /// Underlying cause.
        reason: String,
    },

    /// A binary payload could not be decoded from its text transport form.
    #[error("invalid payload encoding: {reason}")]
    PayloadEncoding {
        /// Underlying cause.
        reason: String,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The rate limiter was shut down while a caller waited for a slot.
    #[error("rate limiter closed")]
    LimiterClosed,
}

impl CoreError {
    /// Returns true if the error was caused by bad input rather than a local fault.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownKind { .. } | Self::EmptyName | Self::MissingField { .. }
        )
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_display() {
        let err = CoreError::UnknownKind {
            kind: "histogram".to_string(),
        };
        assert_eq!(err.to_string(), "invalid metric type: histogram");
    }

    #[test]
    fn missing_field_display() {
        let err = CoreError::MissingField {
            name: "Alloc".to_string(),
            field: "value",
        };
        assert_eq!(err.to_string(), "metric Alloc has no value");
    }

    #[test]
    fn validation_classification() {
        assert!(CoreError::EmptyName.is_validation());
        assert!(
            CoreError::UnknownKind {
                kind: "x".to_string()
            }
            .is_validation()
        );
        assert!(!CoreError::LimiterClosed.is_validation());
        assert!(
            !CoreError::Compression {
                reason: "eof".to_string()
            }
            .is_validation()
        );
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<i32>("nope").unwrap_err();
        let err = CoreError::from(serde_err);
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
