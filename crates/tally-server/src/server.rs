//! Server lifecycle: storage selection, restore, serving and shutdown.

use std::sync::Arc;

use tally_store::{DurablePersister, MetricStore, Repository, SnapshotPersister};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ServerConfig, StorageKind};
use crate::error::{ServerError, ServerResult};
use crate::guard::Gatekeeper;
use crate::routes::create_router;
use crate::rpc::RpcServer;
use crate::state::{AppState, SharedState};

/// The persistence worker chosen for this run.
#[derive(Debug, Clone)]
pub enum Persistence {
    /// No persistence.
    Memory,
    /// Periodic snapshots to a backup file.
    Snapshot(SnapshotPersister),
    /// Periodic upserts into PostgreSQL.
    Database(DurablePersister),
}

/// The metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServer {
    config: ServerConfig,
}

impl MetricsServer {
    /// Creates a server for `config`.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Builds the shared state and fills the store from durable storage.
    ///
    /// Nothing is served until this returns.
    pub async fn prepare(&self) -> ServerResult<(SharedState, Persistence)> {
        let store: Arc<dyn Repository> = Arc::new(MetricStore::new());
        let guard = Gatekeeper::from_config(&self.config)?;
        let mut state = AppState::new(Arc::clone(&store), guard);

        let persistence = match self.config.storage() {
            StorageKind::Database(dsn) => {
                let database = DurablePersister::connect(&dsn).await?;
                database.bootstrap().await?;
                database.hydrate(store.as_ref()).await?;
                state = state.with_database(database.clone());
                Persistence::Database(database)
            }
            StorageKind::File(dir) => {
                let snapshots = SnapshotPersister::new(dir);
                if self.config.restore {
                    if let Err(e) = snapshots.restore(store.as_ref()).await {
                        warn!(error = %e, "snapshot restore failed, starting empty");
                    }
                }
                Persistence::Snapshot(snapshots)
            }
            StorageKind::Memory => {
                info!("persistence disabled");
                Persistence::Memory
            }
        };

        Ok((Arc::new(state), persistence))
    }

    /// Runs until `cancel` fires, then drains connections and persists once more.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be prepared, a listener cannot be
    /// bound or the HTTP server fails.
    pub async fn run(self, cancel: CancellationToken) -> ServerResult<()> {
        let (state, persistence) = self.prepare().await?;

        let listener = bind(&self.config.address).await?;
        let rpc_listener = match &self.config.rpc_address {
            Some(address) => Some(bind(address).await?),
            None => None,
        };

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        if let Some(handle) = self.spawn_persistence(persistence, &state, &cancel) {
            tasks.push(handle);
        }
        if let Some(listener) = rpc_listener {
            let server = RpcServer::new(state.clone());
            let rpc_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener, rpc_cancel).await {
                    warn!(error = %e, "RPC server failed");
                }
            }));
        }

        info!(addr = %self.config.address, "HTTP server listening");
        let shutdown = cancel.clone();
        let result = axum::serve(listener, create_router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task panicked");
            }
        }

        info!("server shut down");
        result
    }

    fn spawn_persistence(
        &self,
        persistence: Persistence,
        state: &SharedState,
        cancel: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let repo = state.repo_handle();
        let period = self.config.store_interval;
        let cancel = cancel.clone();

        match persistence {
            Persistence::Memory => None,
            Persistence::Snapshot(snapshots) => Some(tokio::spawn(async move {
                snapshots.run(repo, period, cancel).await;
            })),
            Persistence::Database(database) => Some(tokio::spawn(async move {
                database.run(repo, period, cancel).await;
            })),
        }
    }
}

async fn bind(address: &str) -> ServerResult<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::BindFailed(address.to_string(), e))
}
