use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use grass_core::Session;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::layout::object_key;
use super::locks::{LockError, LockMode, PathLockManager};
use super::paths::{PathError, cache_path_for, meta_path_for};
use super::process::Process;
use super::retry::RetryGuard;
use super::scheduler::{ProcessScheduler, SchedulerError};
use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sidecar stored next to every materialized file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub modified: String,
}

/// Write-through local copy of remote files.
///
/// A cached file is valid while its sidecar's `modified` equals the remote
/// record's. Nothing is ever evicted.
pub struct LocalCache {
    root: PathBuf,
    remote: Arc<dyn RemoteStore>,
    retry: RetryGuard,
    locks: Arc<PathLockManager>,
    scheduler: Arc<ProcessScheduler>,
    process_poll: Duration,
}

impl LocalCache {
    pub fn new(
        root: PathBuf,
        remote: Arc<dyn RemoteStore>,
        retry: RetryGuard,
        locks: Arc<PathLockManager>,
        scheduler: Arc<ProcessScheduler>,
        process_poll: Duration,
    ) -> Self {
        Self {
            root,
            remote,
            retry,
            locks,
            scheduler,
            process_poll,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_path(&self, cloud_path: &str) -> Result<PathBuf, CacheError> {
        Ok(cache_path_for(&self.root, cloud_path)?)
    }

    pub async fn cached_meta(&self, cloud_path: &str) -> Result<Option<CacheMeta>, CacheError> {
        let meta_path = meta_path_for(&self.root, cloud_path)?;
        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                warn!(path = cloud_path, error = %err, "ignoring unreadable cache metadata");
                Ok(None)
            }
        }
    }

    /// Returns a local copy of `cloud_path` whose remote record carries
    /// `modified`, downloading it under a read lock when the cached copy is
    /// stale. `None` means the file could not be obtained.
    pub async fn fetch(
        &self,
        session: &Session,
        cloud_path: &str,
        modified: &str,
    ) -> Result<Option<PathBuf>, CacheError> {
        let local = self.local_path(cloud_path)?;
        let cached = self.cached_meta(cloud_path).await?;
        let cached_modified = cached.as_ref().map(|meta| meta.modified.as_str()).unwrap_or("");
        if cached_modified == modified && tokio::fs::try_exists(&local).await? {
            debug!(path = cloud_path, "cache hit");
            return Ok(Some(local));
        }

        info!(
            path = cloud_path,
            cached = cached_modified,
            remote = modified,
            "cached copy is outdated, downloading"
        );
        let lock = self.locks.acquire(session, cloud_path, LockMode::Read).await?;
        let outcome = self.download(session, cloud_path, modified, &local).await;
        if let Err(err) = self.locks.release(session, &lock).await {
            warn!(path = cloud_path, error = %err, "failed to release read lock");
        }
        outcome
    }

    async fn download(
        &self,
        session: &Session,
        cloud_path: &str,
        modified: &str,
        local: &Path,
    ) -> Result<Option<PathBuf>, CacheError> {
        let key = object_key(&session.user_id, cloud_path);
        let remote = self.remote.as_ref();
        let object = key.as_str();
        let Some(url) = self
            .retry
            .run("blob_url", None, move || remote.blob_url(session, object))
            .await?
        else {
            return Ok(None);
        };

        let process = Process::download(session, url, local);
        self.scheduler.add_process(Arc::clone(&process))?;
        process.wait_terminal(self.process_poll).await;
        if process.has_error() {
            warn!(path = cloud_path, process = process.id(), "download failed");
            return Ok(None);
        }

        let meta_path = meta_path_for(&self.root, cloud_path)?;
        if let Some(parent) = meta_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let meta = CacheMeta {
            modified: modified.to_string(),
        };
        tokio::fs::write(&meta_path, serde_json::to_vec(&meta)?).await?;
        Ok(Some(local.to_path_buf()))
    }
}
