//! Shared state for request handlers.

use std::sync::Arc;

use tally_store::{DurablePersister, MetricStore, Repository};

use crate::guard::Gatekeeper;

/// State handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    repo: Arc<dyn Repository>,
    guard: Gatekeeper,
    database: Option<DurablePersister>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("guard", &self.guard)
            .field("database", &self.database.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates state over `repo` with the given admission policy.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, guard: Gatekeeper) -> Self {
        Self {
            repo,
            guard,
            database: None,
        }
    }

    /// In-memory state with no admission checks.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MetricStore::new()), Gatekeeper::default())
    }

    /// Attaches the database used by `/ping`.
    #[must_use]
    pub fn with_database(mut self, database: DurablePersister) -> Self {
        self.database = Some(database);
        self
    }

    /// The metric repository.
    #[must_use]
    pub fn repo(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    /// Shared handle to the repository.
    #[must_use]
    pub fn repo_handle(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repo)
    }

    /// Admission policy.
    #[must_use]
    pub const fn guard(&self) -> &Gatekeeper {
        &self.guard
    }

    /// The database, if one is configured.
    #[must_use]
    pub const fn database(&self) -> Option<&DurablePersister> {
        self.database.as_ref()
    }
}
