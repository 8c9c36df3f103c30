//! Turning a batch into a sealed payload and delivering it.
//!
//! A batch is encoded by the transport, signed over the plaintext, optionally
//! encrypted, and then sent under a rate-limit permit with retries. The sealed
//! payload is built once and reused across attempts.

use std::future::Future;

use tally_core::{MetricBatch, RateLimiter, RetryExecutor};
use tally_integrity::{PayloadEncryptor, Signer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collector::MetricSet;
use crate::error::AgentResult;

/// A batch ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Encoded batch, encrypted if a public key is configured.
    pub body: Vec<u8>,
    /// Hex HMAC-SHA256 of the unencrypted body.
    pub signature: Option<String>,
}

/// A way of getting envelopes to the server.
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Serializes a batch into this transport's plaintext body.
    fn encode(&self, batch: &MetricBatch) -> AgentResult<Vec<u8>>;

    /// Performs one delivery attempt.
    fn deliver(&self, envelope: &Envelope) -> impl Future<Output = AgentResult<()>> + Send;
}

/// Seals batches and drives them through a [`Transport`].
#[derive(Debug)]
pub struct Reporter<T> {
    transport: T,
    signer: Signer,
    encryptor: Option<PayloadEncryptor>,
    limiter: RateLimiter,
    retry: RetryExecutor,
}

impl<T: Transport> Reporter<T> {
    /// Creates a reporter with the default retry schedule.
    #[must_use]
    pub fn new(
        transport: T,
        signer: Signer,
        encryptor: Option<PayloadEncryptor>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            transport,
            signer,
            encryptor,
            limiter,
            retry: RetryExecutor::default(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// The transport in use.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Encodes, signs and encrypts a batch.
    pub fn seal(&self, batch: &MetricBatch) -> AgentResult<Envelope> {
        let plaintext = self.transport.encode(batch)?;
        let signature = self.signer.sign(&plaintext);
        let body = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&plaintext)?,
            None => plaintext,
        };
        Ok(Envelope { body, signature })
    }

    /// Delivers one batch, retrying transient failures until `cancel` fires.
    pub async fn report(&self, batch: &MetricBatch, cancel: &CancellationToken) -> AgentResult<()> {
        let envelope = self.seal(batch)?;
        let envelope = &envelope;
        let this = self;

        self.retry
            .execute_until(cancel, || async move {
                let _permit = this.limiter.acquire().await?;
                this.transport.deliver(envelope).await
            })
            .await
    }

    /// Builds a batch from `set` and delivers it. A failed batch is dropped;
    /// the next report carries the latest readings and poll count.
    ///
    /// Returns the number of samples delivered.
    pub async fn flush(&self, set: &MetricSet, cancel: &CancellationToken) -> AgentResult<usize> {
        let Some(batch) = set.take_batch() else {
            debug!("nothing sampled yet, skipping report");
            return Ok(0);
        };

        match self.report(&batch, cancel).await {
            Ok(()) => {
                debug!(
                    transport = self.transport.name(),
                    metrics = batch.len(),
                    polls = batch.poll_count(),
                    "batch delivered"
                );
                Ok(batch.len())
            }
            Err(e) => {
                warn!(transport = self.transport.name(), error = %e, "batch dropped");
                Err(e)
            }
        }
    }
}
