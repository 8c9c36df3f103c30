//! Admission checks for batch uploads.
//!
//! Both the `/updates/` route and the RPC `metrics.send` method pass their
//! raw body through [`Gatekeeper::admit`]. The checks run in a fixed order:
//!
//! 1. signature presence, when a key is configured
//! 2. trusted-subnet membership of the declared origin
//! 3. decryption, when a private key is configured
//! 4. signature verification over the decrypted plaintext
//!
//! Without encryption the body already is the plaintext, so its signature
//! is verified as part of step 1.

use std::path::Path;

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;
use tally_integrity::{
    IntegrityError, PayloadDecryptor, REAL_IP_HEADER, SIGNATURE_HEADER, Signer, TrustedSubnet,
    Verification,
};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::state::SharedState;

/// Largest request body accepted by the guarded routes.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Signature, encryption and origin policy for incoming batches.
#[derive(Debug, Clone, Default)]
pub struct Gatekeeper {
    signer: Signer,
    decryptor: Option<PayloadDecryptor>,
    subnet: TrustedSubnet,
}

impl Gatekeeper {
    /// Creates a gatekeeper from its parts.
    #[must_use]
    pub const fn new(
        signer: Signer,
        decryptor: Option<PayloadDecryptor>,
        subnet: TrustedSubnet,
    ) -> Self {
        Self {
            signer,
            decryptor,
            subnet,
        }
    }

    /// Builds the policy described by `config`, loading the private key if one is set.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let signer = config
            .hash_key
            .as_deref()
            .map_or_else(Signer::disabled, |key| Signer::new(key));
        let decryptor = config
            .crypto_key
            .as_deref()
            .map(load_decryptor)
            .transpose()?;
        let subnet = TrustedSubnet::parse(config.trusted_subnet.as_deref().unwrap_or_default())?;
        Ok(Self::new(signer, decryptor, subnet))
    }

    /// The signer used for request checks and response signatures.
    #[must_use]
    pub const fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The trusted subnet.
    #[must_use]
    pub const fn subnet(&self) -> &TrustedSubnet {
        &self.subnet
    }

    /// Rejects origins outside the trusted subnet.
    pub fn check_origin(&self, origin: Option<&str>) -> ServerResult<()> {
        self.subnet.check(origin).map_err(ServerError::from)
    }

    /// Runs every check and returns the plaintext body.
    pub fn admit(
        &self,
        body: Vec<u8>,
        signature: Option<&str>,
        origin: Option<&str>,
    ) -> ServerResult<Vec<u8>> {
        if self.signer.is_enabled() && signature.is_none() {
            return Err(IntegrityError::MissingSignature {
                header: SIGNATURE_HEADER,
            }
            .into());
        }
        if self.decryptor.is_none() {
            self.verify(&body, signature)?;
        }

        self.check_origin(origin)?;

        let Some(decryptor) = &self.decryptor else {
            return Ok(body);
        };
        let plaintext = decryptor.decrypt(&body)?;
        self.verify(&plaintext, signature)?;
        Ok(plaintext)
    }

    fn verify(&self, payload: &[u8], signature: Option<&str>) -> ServerResult<()> {
        let Some(signature) = signature else {
            return Ok(());
        };
        match self.signer.verify(payload, signature) {
            Verification::Disabled | Verification::Valid(_) => Ok(()),
            Verification::Mismatch(_) | Verification::Malformed => {
                debug!("rejected batch with bad signature");
                Err(IntegrityError::InvalidSignature.into())
            }
        }
    }
}

fn load_decryptor(path: &Path) -> ServerResult<PayloadDecryptor> {
    Ok(PayloadDecryptor::from_file(path)?)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Middleware for `/updates/`: admits the body, forwards the plaintext and
/// signs the response.
pub async fn admit_batch(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("cannot read body: {e}")))?;

    let signature = header(&parts.headers, SIGNATURE_HEADER).map(str::to_owned);
    let origin = header(&parts.headers, REAL_IP_HEADER).map(str::to_owned);
    let plaintext = state
        .guard()
        .admit(bytes.to_vec(), signature.as_deref(), origin.as_deref())?;

    parts.headers.remove(CONTENT_LENGTH);
    let response = next
        .run(Request::from_parts(parts, Body::from(plaintext)))
        .await;
    sign_response(state.guard().signer(), response).await
}

/// Middleware for single-metric updates: trusted-subnet check only.
pub async fn admit_origin(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    state
        .guard()
        .check_origin(header(request.headers(), REAL_IP_HEADER))?;
    Ok(next.run(request).await)
}

/// Adds the signature header over the uncompressed response body.
async fn sign_response(signer: &Signer, response: Response) -> Result<Response, ServerError> {
    if !signer.is_enabled() {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes: Bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ServerError::Internal(format!("cannot read response body: {e}")))?;

    if let Some(signature) = signer.sign(&bytes) {
        let value = HeaderValue::from_str(&signature)
            .map_err(|e| ServerError::Internal(format!("invalid signature header: {e}")))?;
        parts.headers.insert(SIGNATURE_HEADER, value);
    }
    Ok(Response::from_parts(parts, Body::from(bytes)))
}
