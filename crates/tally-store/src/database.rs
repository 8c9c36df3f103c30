//! PostgreSQL persistence.
//!
//! The table holds one row per metric name. Gauges fill `value`, counters
//! fill `delta` with their running total. Writes are retried only for the
//! SQLSTATE codes listed in [`TRANSIENT_SQLSTATES`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tally_core::schedule::run_every;
use tally_core::{MetricKind, MetricSample, RetryExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{Result, StoreError};
use crate::repository::{Repository, replay};

/// SQLSTATE codes treated as transient.
///
/// `57P01` admin shutdown, `08006` connection failure, `08000` connection
/// exception, `40P01` deadlock detected, `40001` serialization failure.
pub const TRANSIENT_SQLSTATES: [&str; 5] = ["57P01", "08006", "08000", "40P01", "40001"];

/// Returns true if `code` is a transient SQLSTATE.
#[must_use]
pub fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATES.contains(&code)
}

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS observability";

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS observability.metrics (
        id SERIAL PRIMARY KEY,
        type VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL UNIQUE,
        value DOUBLE PRECISION,
        delta BIGINT
    )";

const UPSERT_GAUGE: &str = r"
    INSERT INTO observability.metrics (name, type, value, delta)
    VALUES ($1, $2, $3, NULL)
    ON CONFLICT (name) DO UPDATE
    SET type = EXCLUDED.type, value = EXCLUDED.value, delta = NULL";

const UPSERT_COUNTER: &str = r"
    INSERT INTO observability.metrics (name, type, value, delta)
    VALUES ($1, $2, NULL, $3)
    ON CONFLICT (name) DO UPDATE
    SET type = EXCLUDED.type, value = NULL, delta = EXCLUDED.delta";

const SELECT_GAUGES: &str =
    "SELECT name, value FROM observability.metrics WHERE type = 'gauge' AND value IS NOT NULL";

const SELECT_COUNTERS: &str =
    "SELECT name, delta FROM observability.metrics WHERE type = 'counter' AND delta IS NOT NULL";

/// Default deadline for a single statement.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads rows read from the database into `repo` and returns how many applied.
fn restore<R>(repo: &R, gauges: Vec<(String, f64)>, counters: Vec<(String, i64)>) -> usize
where
    R: Repository + ?Sized,
{
    let samples: Vec<MetricSample> = gauges
        .into_iter()
        .map(|(name, value)| MetricSample::gauge(name, value))
        .chain(
            counters
                .into_iter()
                .map(|(name, delta)| MetricSample::counter(name, delta)),
        )
        .collect();
    replay(repo, &samples)
}

/// Upserts the store into PostgreSQL and hydrates it back on startup.
#[derive(Debug, Clone)]
pub struct DurablePersister {
    pool: PgPool,
    retry: RetryExecutor,
    statement_timeout: Duration,
}

impl DurablePersister {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryExecutor::default(),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Connects to `dsn` with a small pool.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        info!("connected to database");
        Ok(Self::new(pool))
    }

    /// Replaces the retry policy for upserts.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the per-statement deadline.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the schema and table if they do not exist, in one transaction.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_SCHEMA).execute(&mut *tx).await?;
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("database schema ready");
        Ok(())
    }

    /// Loads every stored metric into `repo`. Counters add to what is already there.
    #[instrument(skip(self, repo))]
    pub async fn hydrate<R>(&self, repo: &R) -> Result<usize>
    where
        R: Repository + ?Sized,
    {
        let gauges: Vec<(String, f64)> = sqlx::query_as(SELECT_GAUGES)
            .fetch_all(&self.pool)
            .await?;
        let counters: Vec<(String, i64)> = sqlx::query_as(SELECT_COUNTERS)
            .fetch_all(&self.pool)
            .await?;

        let applied = restore(repo, gauges, counters);
        info!(metrics = applied, "store hydrated from database");
        Ok(applied)
    }

    /// Upserts every metric in `repo`, stopping at the first failure.
    pub async fn save<R>(&self, repo: &R) -> Result<usize>
    where
        R: Repository + ?Sized,
    {
        let samples = repo.snapshot().samples();
        let saved = self
            .save_with(&samples, |sample| self.upsert(sample))
            .await?;
        debug!(metrics = saved, "store saved to database");
        Ok(saved)
    }

    /// Runs `upsert` for each sample under the retry policy.
    ///
    /// Transient errors are retried per the schedule. The first error that is
    /// terminal, or that outlives the schedule, aborts the remaining samples.
    async fn save_with<'a, F, Fut>(&self, samples: &'a [MetricSample], mut upsert: F) -> Result<usize>
    where
        F: FnMut(&'a MetricSample) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for sample in samples {
            self.retry
                .execute(|| upsert(sample))
                .await
                .inspect_err(|e| {
                    error!(metric = %sample.name(), error = %e, "upsert failed, aborting save");
                })?;
        }
        Ok(samples.len())
    }

    async fn upsert(&self, sample: &MetricSample) -> Result<()> {
        let kind = sample.kind();
        let query = match kind {
            MetricKind::Gauge => sqlx::query(UPSERT_GAUGE)
                .bind(sample.name())
                .bind(kind.as_str())
                .bind(sample.gauge_value()),
            MetricKind::Counter => sqlx::query(UPSERT_COUNTER)
                .bind(sample.name())
                .bind(kind.as_str())
                .bind(sample.counter_delta()),
        };

        tokio::time::timeout(self.statement_timeout, query.execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "upsert",
            })??;
        Ok(())
    }

    /// Checks that the database answers within `timeout`.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout { operation: "ping" })??;
        Ok(())
    }

    /// Saves every `period` until cancelled, then performs one final save.
    pub async fn run(
        &self,
        repo: Arc<dyn Repository>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        info!(period_secs = period.as_secs(), "database saver started");

        let store = repo.as_ref();
        run_every(period, &cancel, || async move {
            if let Err(e) = self.save(store).await {
                error!(error = %e, "database save failed");
            }
        })
        .await;

        if let Err(e) = self.save(store).await {
            error!(error = %e, "final database save failed");
        }
        self.pool.close().await;
        info!("database saver stopped");
    }
}
