//! HMAC-SHA256 request signing.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Outcome of [`Signer::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No key is configured; the caller must skip the check.
    Disabled,
    /// The signature matches. Carries the computed hex signature.
    Valid(String),
    /// The signature does not match. Carries the computed hex signature.
    Mismatch(String),
    /// The presented signature is not valid hex.
    Malformed,
}

impl Verification {
    /// Returns true only for [`Verification::Valid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Signs and verifies payloads with a shared secret.
///
/// An empty key disables signing: [`Signer::sign`] returns `None` and
/// [`Signer::verify`] returns [`Verification::Disabled`].
#[derive(Clone, Default)]
pub struct Signer {
    key: Option<Vec<u8>>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Creates a signer. An empty key yields a disabled signer.
    #[must_use]
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        Self {
            key: (!key.is_empty()).then(|| key.to_vec()),
        }
    }

    /// Creates a signer with no key.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { key: None }
    }

    /// Returns true if a key is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Returns the hex signature of `payload`, or `None` when disabled.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        self.digest(payload).map(hex::encode)
    }

    /// Checks `signature` (hex) against `payload`.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &str) -> Verification {
        let Some(computed) = self.digest(payload) else {
            return Verification::Disabled;
        };
        let Ok(presented) = hex::decode(signature.trim()) else {
            return Verification::Malformed;
        };

        let matches: bool = computed.as_slice().ct_eq(presented.as_slice()).into();
        let computed = hex::encode(computed);
        if matches {
            Verification::Valid(computed)
        } else {
            Verification::Mismatch(computed)
        }
    }

    fn digest(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let key = self.key.as_deref()?;
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(payload);
        Some(mac.finalize().into_bytes().to_vec())
    }
}
