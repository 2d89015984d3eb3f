//! Incremental state persistence
//!
//! The sync tool keeps per-source cursor state in a small sqlite file. This
//! module round-trips that file through a durable, namespaced blob store:
//! fetched into the run workspace before the tool starts, persisted back
//! after the run completes — success or tool-reported failure alike.
//!
//! The namespace and file name are fixed constants, so every run of the same
//! task identity shares one state slot. Concurrent runs racing on that slot
//! are an accepted limitation: persist is last-writer-wins, no lock is taken.

use crate::errors::{Result, StateError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Namespace for all incremental-state blobs
pub const STATE_NAMESPACE: &str = "CloudQueryState";

/// Fixed name of the incremental database file.
///
/// The spelling is historical but load-bearing: it is the storage key under
/// which existing deployments persisted their state, so it stays verbatim.
pub const INCREMENTAL_DB_FILENAME: &str = "icrementaldb.sqlite";

/// Durable, namespaced blob store
///
/// `get_blob` returns `Ok(None)` for a never-persisted key; only real store
/// failures are errors.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_blob(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>>;
    async fn put_blob(&self, namespace: &str, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed blob store, one file per `(namespace, name)` key
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(StateError::Io)?;
        Ok(Self { root })
    }

    /// Default store location: `$CQTASK_STATE_DIR` or a fixed directory under
    /// the platform temp dir.
    pub fn default_root() -> PathBuf {
        std::env::var_os("CQTASK_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("cqtask-state"))
    }

    fn blob_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(name)
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    #[instrument(skip(self))]
    async fn get_blob(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(namespace, name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), len = bytes.len(), "Read state blob");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io(e).into()),
        }
    }

    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn put_blob(&self, namespace: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(namespace, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StateError::Io)?;
        }

        // Write through a sibling temp file and rename so a crashed persist
        // never leaves a partial blob behind.
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(StateError::Io)?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(StateError::Io)?;

        debug!(path = %path.display(), "Wrote state blob");
        Ok(())
    }
}

/// Fetch/persist cycle for the incremental database file
#[derive(Clone)]
pub struct IncrementalStateManager {
    store: Arc<dyn StateStore>,
}

impl IncrementalStateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Materialize the persisted state file into `work_dir`.
    ///
    /// Copies the stored blob to `work_dir/icrementaldb.sqlite`, overwriting
    /// any existing file; a never-persisted slot yields an empty file
    /// instead. Returns the local path. Only local file creation failures are
    /// errors.
    #[instrument(skip(self, work_dir))]
    pub async fn fetch(&self, work_dir: &Path) -> Result<PathBuf> {
        let local = work_dir.join(INCREMENTAL_DB_FILENAME);
        match self
            .store
            .get_blob(STATE_NAMESPACE, INCREMENTAL_DB_FILENAME)
            .await?
        {
            Some(bytes) => {
                tokio::fs::write(&local, &bytes)
                    .await
                    .map_err(StateError::Io)?;
                info!(len = bytes.len(), "Restored incremental state");
            }
            None => {
                tokio::fs::write(&local, b"").await.map_err(StateError::Io)?;
                debug!("No persisted incremental state, starting empty");
            }
        }
        Ok(local)
    }

    /// Persist the state file back to the durable store, replacing any prior
    /// version. Last-writer-wins across concurrent runs.
    #[instrument(skip(self, file_path))]
    pub async fn persist(&self, file_path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(file_path).await.map_err(StateError::Io)?;
        self.store
            .put_blob(STATE_NAMESPACE, INCREMENTAL_DB_FILENAME, &bytes)
            .await?;
        info!(len = bytes.len(), "Persisted incremental state");
        Ok(())
    }
}
