//! The poll and report loops.

use std::sync::Arc;

use tally_core::RateLimiter;
use tally_core::schedule::run_every;
use tally_integrity::{PayloadEncryptor, Signer};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::MetricSet;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::http::HttpTransport;
use crate::reporter::{Reporter, Transport};
use crate::rpc::RpcTransport;
use crate::sampler::{Sampler, SystemSampler};

/// Runs the agent with the host sampler until `cancel` fires.
///
/// # Errors
///
/// Fails before starting if the public key cannot be loaded or the HTTP
/// client cannot be built.
pub async fn run(config: AgentConfig, cancel: CancellationToken) -> AgentResult<()> {
    let signer = match config.hash_key.as_deref() {
        Some(key) => Signer::new(key),
        None => Signer::disabled(),
    };
    let encryptor = match &config.crypto_key {
        Some(path) => Some(PayloadEncryptor::from_file(path)?),
        None => None,
    };
    let limiter = RateLimiter::new(config.rate_limit);

    info!(
        address = %config.address,
        rpc_address = ?config.rpc_address,
        signed = signer.is_enabled(),
        encrypted = encryptor.is_some(),
        rate_limit = limiter.limit(),
        "agent starting"
    );

    match &config.rpc_address {
        Some(address) => {
            let transport = RpcTransport::new(address);
            let reporter = Reporter::new(transport, signer, encryptor, limiter);
            run_with(&config, SystemSampler::new(), reporter, cancel).await
        }
        None => {
            let transport = HttpTransport::new(&config.address)?;
            let reporter = Reporter::new(transport, signer, encryptor, limiter);
            run_with(&config, SystemSampler::new(), reporter, cancel).await
        }
    }
}

/// Runs the poll and report loops with an explicit sampler and reporter.
///
/// Each report tick takes a batch and delivers it on its own task, so a slow
/// delivery never delays sampling or the next report. On cancellation both
/// loops stop, and deliveries already started are awaited.
///
/// A failed delivery is logged and does not stop the agent. A delivery task
/// that panics is reported as the returned error once everything has stopped.
pub async fn run_with<S, T>(
    config: &AgentConfig,
    mut sampler: S,
    reporter: Reporter<T>,
    cancel: CancellationToken,
) -> AgentResult<()>
where
    S: Sampler,
    T: Transport + 'static,
{
    let set = MetricSet::new();
    let reporter = Arc::new(reporter);
    let mut deliveries: JoinSet<AgentResult<usize>> = JoinSet::new();
    let mut first_failure: Option<AgentError> = None;

    let poll = run_every(config.poll_interval, &cancel, || {
        set.record(sampler.sample());
        std::future::ready(())
    });

    let report = run_every(config.report_interval, &cancel, || {
        while let Some(finished) = deliveries.try_join_next() {
            settle(finished, &mut first_failure);
        }

        let reporter = Arc::clone(&reporter);
        let set = set.clone();
        let cancel = cancel.clone();
        deliveries.spawn(async move { reporter.flush(&set, &cancel).await });
        std::future::ready(())
    });

    tokio::join!(poll, report);

    debug!(in_flight = deliveries.len(), "waiting for deliveries");
    while let Some(finished) = deliveries.join_next().await {
        settle(finished, &mut first_failure);
    }

    info!(polls = set.polls(), "agent stopped");
    first_failure.map_or(Ok(()), Err)
}

/// Keeps the first task failure. Delivery errors are already logged by the reporter.
fn settle(finished: Result<AgentResult<usize>, JoinError>, first_failure: &mut Option<AgentError>) {
    if let Err(e) = finished {
        warn!(error = %e, "delivery task panicked");
        first_failure.get_or_insert(AgentError::Task(e));
    }
}
