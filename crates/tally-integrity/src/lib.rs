//! Transport integrity for the tally pipeline.
#![forbid(unsafe_code)]
//!
//! Three independent capabilities, each switched on by configuration:
//!
//! - [`Signer`]: HMAC-SHA256 over the uncompressed, unencrypted payload,
//!   carried in the [`SIGNATURE_HEADER`] header
//! - [`PayloadEncryptor`] / [`PayloadDecryptor`]: RSA PKCS#1 v1.5 encryption
//!   of the serialized batch
//! - [`TrustedSubnet`]: rejects senders whose declared IP
//!   ([`REAL_IP_HEADER`]) is outside a CIDR block
//!
//! # Example
//!
//! ```rust
//! use tally_integrity::{Signer, Verification};
//!
//! let signer = Signer::new("secret");
//! let signature = signer.sign(b"payload").unwrap();
//! assert!(signer.verify(b"payload", &signature).is_valid());
//! assert_eq!(Signer::disabled().verify(b"payload", &signature), Verification::Disabled);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod encryption;
pub mod error;
pub mod signing;
pub mod subnet;

pub use encryption::{PayloadDecryptor, PayloadEncryptor};
pub use error::{IntegrityError, Result};
pub use signing::{SIGNATURE_HEADER, Signer, Verification};
pub use subnet::{REAL_IP_HEADER, TrustedSubnet};
