//! Periodic snapshots to an append-only backup file.
//!
//! Each save appends the whole store as one JSON line. Restore reads only the
//! last non-empty line; earlier lines are stale history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tally_core::schedule::run_every;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, StoreError};
use crate::repository::{Repository, Snapshot, replay};

/// Name of the backup file inside the storage directory.
pub const BACKUP_FILE_NAME: &str = "metrics.bk";

/// Writes and restores store snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotPersister {
    dir: PathBuf,
    path: PathBuf,
}

impl SnapshotPersister {
    /// Creates a persister writing `<dir>/metrics.bk`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(BACKUP_FILE_NAME);
        Self { dir, path }
    }

    /// Path of the backup file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Appends the current contents of `repo` as one line.
    pub async fn save<R>(&self, repo: &R) -> Result<usize>
    where
        R: Repository + ?Sized,
    {
        let snapshot = repo.snapshot();
        let mut line = serde_json::to_vec(&snapshot)?;
        line.push(b'\n');

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), metrics = snapshot.len(), "snapshot saved");
        Ok(snapshot.len())
    }

    /// Reads the last non-empty line of the backup file.
    ///
    /// Returns `None` when the file does not exist or holds no snapshot.
    pub async fn load_latest(&self) -> Result<Option<Snapshot>> {
        let file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut last: Option<String> = None;
        while let Some(line) = lines.next_line().await.map_err(|e| self.io_error(e))? {
            if !line.trim().is_empty() {
                last = Some(line);
            }
        }

        last.map(|line| serde_json::from_str(&line).map_err(StoreError::from))
            .transpose()
    }

    /// Replays the latest snapshot into `repo`. Returns the number of metrics applied.
    pub async fn restore<R>(&self, repo: &R) -> Result<usize>
    where
        R: Repository + ?Sized,
    {
        let Some(snapshot) = self.load_latest().await? else {
            info!(path = %self.path.display(), "no snapshot to restore");
            return Ok(0);
        };

        let applied = replay(repo, &snapshot.samples());
        info!(path = %self.path.display(), metrics = applied, "snapshot restored");
        Ok(applied)
    }

    /// Saves every `period` until cancelled, then writes one final snapshot.
    pub async fn run(
        &self,
        repo: Arc<dyn Repository>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        info!(path = %self.path.display(), period_secs = period.as_secs(), "snapshot worker started");

        let store = repo.as_ref();
        run_every(period, &cancel, || async move {
            if let Err(e) = self.save(store).await {
                error!(error = %e, "snapshot failed");
            }
        })
        .await;

        if let Err(e) = self.save(store).await {
            error!(error = %e, "final snapshot failed");
        }
        info!("snapshot worker stopped");
    }
}
