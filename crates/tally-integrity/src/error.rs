//! Error types for integrity checks.

use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while signing, encrypting or filtering requests.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Signing is enabled but the request carries no signature.
    #[error("missing {header} header")]
    MissingSignature {
        /// Header that was expected.
        header: &'static str,
    },

    /// The signature does not match the payload.
    #[error("signature mismatch")]
    InvalidSignature,

    /// A key could not be loaded or parsed.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Underlying cause.
        reason: String,
    },

    /// Reading a key file failed.
    #[error("failed to read key {path}: {source}")]
    KeyFile {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption {
        /// Underlying cause.
        reason: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// Underlying cause.
        reason: String,
    },

    /// The trusted subnet is not valid CIDR.
    #[error("invalid trusted subnet {value:?}: {reason}")]
    InvalidSubnet {
        /// Configured value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A trusted subnet is configured but the sender declared no IP.
    #[error("missing origin address")]
    MissingOrigin,

    /// The declared origin is not an IP address.
    #[error("invalid origin address {value:?}")]
    InvalidOrigin {
        /// Declared value.
        value: String,
    },

    /// The origin lies outside the trusted subnet.
    #[error("origin {ip} is not in the trusted subnet")]
    UntrustedOrigin {
        /// Declared IP.
        ip: IpAddr,
    },
}

impl IntegrityError {
    /// Returns true for origin rejections, which map to "forbidden" rather
    /// than "bad request".
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Self::MissingOrigin | Self::InvalidOrigin { .. } | Self::UntrustedOrigin { .. }
        )
    }
}

/// Result type alias for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;
