//! RSA payload encryption.
//!
//! The sender encrypts the serialized batch with the receiver's public key
//! before compression; the receiver decrypts with its private key before
//! parsing. PKCS#1 v1.5 caps a single block at `key size - 11` bytes, so
//! payloads are split into blocks and the ciphertext is the concatenation of
//! one key-sized block per chunk.

use std::fmt;
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::error::{IntegrityError, Result};

/// PKCS#1 v1.5 padding overhead in bytes.
const PADDING_OVERHEAD: usize = 11;

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| IntegrityError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Encrypts payloads with a public key.
#[derive(Clone)]
pub struct PayloadEncryptor {
    key: RsaPublicKey,
}

impl fmt::Debug for PayloadEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadEncryptor")
            .field("key_bits", &(self.key.size() * 8))
            .finish()
    }
}

impl PayloadEncryptor {
    /// Wraps an already parsed key.
    #[must_use]
    pub const fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parses a `PUBLIC KEY` (SPKI) or `RSA PUBLIC KEY` (PKCS#1) PEM block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(Self::new)
            .map_err(|e| IntegrityError::InvalidKey {
                reason: e.to_string(),
            })
    }

    /// Loads a public key PEM file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let encryptor = Self::from_pem(&read_pem(path)?)?;
        debug!(path = %path.display(), "loaded public key");
        Ok(encryptor)
    }

    /// Encrypts `plaintext` block by block.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        let chunk = block.saturating_sub(PADDING_OVERHEAD);
        if chunk == 0 {
            return Err(IntegrityError::Encryption {
                reason: "key too small".to_string(),
            });
        }

        let mut rng = rand::thread_rng();
        let chunks: Vec<&[u8]> = if plaintext.is_empty() {
            vec![plaintext]
        } else {
            plaintext.chunks(chunk).collect()
        };

        let mut out = Vec::with_capacity(chunks.len() * block);
        for part in chunks {
            let sealed = self
                .key
                .encrypt(&mut rng, Pkcs1v15Encrypt, part)
                .map_err(|e| IntegrityError::Encryption {
                    reason: e.to_string(),
                })?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

/// Decrypts payloads with a private key.
#[derive(Clone)]
pub struct PayloadDecryptor {
    key: RsaPrivateKey,
}

impl fmt::Debug for PayloadDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadDecryptor")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PayloadDecryptor {
    /// Wraps an already parsed key.
    #[must_use]
    pub const fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parses an `RSA PRIVATE KEY` (PKCS#1) or `PRIVATE KEY` (PKCS#8) PEM block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map(Self::new)
            .map_err(|e| IntegrityError::InvalidKey {
                reason: e.to_string(),
            })
    }

    /// Loads a private key PEM file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let decryptor = Self::from_pem(&read_pem(path)?)?;
        debug!(path = %path.display(), "loaded private key");
        Ok(decryptor)
    }

    /// Returns an encryptor for the matching public key.
    #[must_use]
    pub fn encryptor(&self) -> PayloadEncryptor {
        PayloadEncryptor::new(self.key.to_public_key())
    }

    /// Decrypts a ciphertext produced by [`PayloadEncryptor::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(IntegrityError::Decryption {
                reason: format!(
                    "ciphertext length {} is not a multiple of {block}",
                    ciphertext.len()
                ),
            });
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for part in ciphertext.chunks(block) {
            let opened = self
                .key
                .decrypt(Pkcs1v15Encrypt, part)
                .map_err(|e| IntegrityError::Decryption {
                    reason: e.to_string(),
                })?;
            out.extend_from_slice(&opened);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    #[test]
    fn short_payload_roundtrip() {
        let decryptor = PayloadDecryptor::new(test_key().clone());
        let sealed = decryptor.encryptor().encrypt(b"[]").unwrap();

        assert_eq!(sealed.len(), 128);
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), b"[]");
    }

    #[test]
    fn payload_longer_than_one_block() {
        let decryptor = PayloadDecryptor::new(test_key().clone());
        let payload = br#"{"id":"Alloc","type":"gauge","value":78910987.77}"#.repeat(20);

        let sealed = decryptor.encryptor().encrypt(&payload).unwrap();
        assert_eq!(sealed.len() % 128, 0);
        assert!(sealed.len() > 128);
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let decryptor = PayloadDecryptor::new(test_key().clone());
        let sealed = decryptor.encryptor().encrypt(&[]).unwrap();
        assert!(decryptor.decrypt(&sealed).unwrap().is_empty());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let decryptor = PayloadDecryptor::new(test_key().clone());
        let sealed = decryptor.encryptor().encrypt(b"hello").unwrap();
        let err = decryptor.decrypt(&sealed[..sealed.len() - 1]).unwrap_err();
        assert!(matches!(err, IntegrityError::Decryption { .. }));
    }

    #[test]
    fn plaintext_is_rejected() {
        let decryptor = PayloadDecryptor::new(test_key().clone());
        let err = decryptor.decrypt(&[7u8; 128]).unwrap_err();
        assert!(matches!(err, IntegrityError::Decryption { .. }));
    }

    #[test]
    fn keys_load_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");

        let private_pem = test_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let public_pem = test_key()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        std::fs::write(&private_path, private_pem.as_bytes()).unwrap();
        std::fs::write(&public_path, public_pem.as_bytes()).unwrap();

        let encryptor = PayloadEncryptor::from_file(&public_path).unwrap();
        let decryptor = PayloadDecryptor::from_file(&private_path).unwrap();

        let sealed = encryptor.encrypt(b"PollCount").unwrap();
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), b"PollCount");
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(matches!(
            PayloadEncryptor::from_pem("not a key"),
            Err(IntegrityError::InvalidKey { .. })
        ));
        assert!(matches!(
            PayloadDecryptor::from_pem("not a key"),
            Err(IntegrityError::InvalidKey { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = PayloadDecryptor::from_file("/nonexistent/private.pem").unwrap_err();
        assert!(matches!(err, IntegrityError::KeyFile { .. }));
    }

    #[test]
    fn debug_redacts_private_key() {
        let rendered = format!("{:?}", PayloadDecryptor::new(test_key().clone()));
        assert!(rendered.contains("REDACTED"));
    }
}
