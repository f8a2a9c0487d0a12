use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use grass_core::Session;
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::{CacheError, LocalCache};
use super::codec;
use super::layout::{access_list_key, object_key, owned_tree_key, record_key};
use super::locks::{DEFAULT_LOCK_POLL_INTERVAL, LockError, LockMode, PathLockManager};
use super::node::RemoteNode;
use super::paths;
use super::process::Process;
use super::retry::RetryGuard;
use super::scheduler::{ProcessScheduler, SchedulerError};
use crate::remote::{RemoteError, RemoteStore};

pub const DEFAULT_PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("time format error: {0}")]
    Time(#[from] time::error::Format),
    #[error("invalid cloud path: {0:?}")]
    InvalidPath(String),
    #[error("not owned by the current user: {0}")]
    NotOwned(String),
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("transfer failed for {0}")]
    TransferFailed(String),
    #[error("remote store unreachable while handling {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub cache_root: PathBuf,
    pub retry: RetryGuard,
    pub lock_poll: Duration,
    pub process_poll: Duration,
}

impl SyncSettings {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            retry: RetryGuard::default(),
            lock_poll: DEFAULT_LOCK_POLL_INTERVAL,
            process_poll: DEFAULT_PROCESS_POLL_INTERVAL,
        }
    }
}

/// One child of a folder in the owned tree, with its name decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_folder: bool,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordWrite {
    /// Replace the whole record (new upload).
    Replace,
    /// Only refresh `modified` on an existing record.
    Refresh,
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    retry: RetryGuard,
    locks: Arc<PathLockManager>,
    scheduler: Arc<ProcessScheduler>,
    cache: LocalCache,
    process_poll: Duration,
}

impl SyncCoordinator {
    /// Builds the coordinator and starts its transfer worker on the current
    /// runtime.
    pub fn new(remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        let SyncSettings {
            cache_root,
            retry,
            lock_poll,
            process_poll,
        } = settings;
        let locks = Arc::new(PathLockManager::new(Arc::clone(&remote), retry, lock_poll));
        let scheduler = Arc::new(ProcessScheduler::start(Arc::clone(&remote), retry));
        let cache = LocalCache::new(
            cache_root,
            Arc::clone(&remote),
            retry,
            Arc::clone(&locks),
            Arc::clone(&scheduler),
            process_poll,
        );
        Self {
            remote,
            retry,
            locks,
            scheduler,
            cache,
            process_poll,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    /// Sends `local` to `path` in the caller's tree under a write lock and
    /// records it with a fresh `modified` marker.
    pub async fn upload(&self, session: &Session, path: &str, local: &Path) -> Result<(), SyncError> {
        ensure_file_path(path)?;
        self.transfer_and_record(session, path, local, RecordWrite::Replace)
            .await
    }

    /// Like [`SyncCoordinator::upload`], but only for files the caller
    /// already owns; the existing record keeps everything except `modified`.
    pub async fn update(&self, session: &Session, path: &str, local: &Path) -> Result<(), SyncError> {
        let segments = ensure_file_path(path)?;
        let owned = self.owned_tree(session, path).await?;
        if !owned.contains_file(&segments) {
            warn!(path, user = %session.user_id, "refusing to update a file the user does not own");
            return Err(SyncError::NotOwned(path.to_string()));
        }
        self.transfer_and_record(session, path, local, RecordWrite::Refresh)
            .await
    }

    /// Returns a local copy of the file at `path`, downloading it when the
    /// cached copy is stale. `None` when the record is absent, is a folder,
    /// or the file could not be obtained.
    pub async fn fetch(&self, session: &Session, path: &str) -> Result<Option<PathBuf>, SyncError> {
        ensure_file_path(path)?;
        let key = record_key(&session.user_id, path);
        let remote = self.remote.as_ref();
        let record_ref = key.as_str();
        let Some(record) = self
            .retry
            .run("record_read", None, move || remote.read(session, record_ref))
            .await?
        else {
            warn!(path, "remote store unreachable, file not available");
            return Ok(None);
        };

        let Some(node) = record.as_ref().and_then(RemoteNode::from_value) else {
            debug!(path, "no remote record");
            return Ok(None);
        };
        let RemoteNode::File { modified } = node else {
            debug!(path, "remote record is a folder");
            return Ok(None);
        };

        let modified = modified.unwrap_or_default();
        match self.cache.fetch(session, path, &modified).await {
            Ok(local) => Ok(local),
            Err(CacheError::Lock(LockError::Unavailable(_))) => {
                warn!(path, "lock table unreachable, file not available");
                Ok(None)
            }
            Err(CacheError::Remote(err)) if err.is_not_found() => {
                warn!(path, "record has no stored content");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes a file the caller owns: its stored content, then its record.
    /// Takes no lock.
    pub async fn delete(&self, session: &Session, path: &str) -> Result<(), SyncError> {
        let segments = ensure_file_path(path)?;
        let owned = self.owned_tree(session, path).await?;
        if !owned.contains_file(&segments) {
            warn!(path, user = %session.user_id, "refusing to delete a file the user does not own");
            return Err(SyncError::NotOwned(path.to_string()));
        }

        let remote = self.remote.as_ref();
        let object = object_key(&session.user_id, path);
        let object_ref = object.as_str();
        match self
            .retry
            .run("blob_delete", None, move || remote.blob_delete(session, object_ref))
            .await
        {
            Ok(Some(())) => {}
            Ok(None) => return Err(SyncError::Unavailable(path.to_string())),
            Err(err) if err.is_not_found() => {
                debug!(path, "stored content already gone");
            }
            Err(err) => return Err(err.into()),
        }

        let key = record_key(&session.user_id, path);
        let record_ref = key.as_str();
        self.retry
            .run("record_delete", None, move || remote.delete(session, record_ref))
            .await?
            .ok_or_else(|| SyncError::Unavailable(path.to_string()))?;
        info!(path, "deleted");
        Ok(())
    }

    /// Children of the folder at `path` in the caller's tree, sorted by
    /// name. A missing folder lists as empty.
    pub async fn list(&self, session: &Session, path: &str) -> Result<Vec<ListEntry>, SyncError> {
        let owned = self.owned_tree(session, path).await?;
        let segments = codec::encode_segments(path);
        let children = match owned.find(&segments) {
            None => return Ok(Vec::new()),
            Some(RemoteNode::File { .. }) => return Err(SyncError::NotAFolder(path.to_string())),
            Some(RemoteNode::Folder(children)) => children,
        };

        let mut entries: Vec<ListEntry> = children
            .iter()
            .map(|(name, child)| ListEntry {
                name: codec::decode(name),
                is_folder: !child.is_file(),
                modified: child.modified().map(str::to_string),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Ids of the users who shared files with the caller.
    pub async fn access_list(&self, session: &Session) -> Result<Vec<String>, SyncError> {
        let key = access_list_key(&session.user_id);
        let remote = self.remote.as_ref();
        let key_ref = key.as_str();
        let value = self
            .retry
            .run("access_list_read", None, move || remote.read(session, key_ref))
            .await?
            .ok_or_else(|| SyncError::Unavailable(key.clone()))?;

        let ids = match value {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::Object(items)) => items
                .values()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Ok(ids)
    }

    /// Releases every lock still held for the session.
    pub async fn end_session(&self, session: &Session) -> usize {
        self.locks.release_all(session).await
    }

    /// Drains queued transfers and stops the worker.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.scheduler.shutdown().await?;
        Ok(())
    }

    pub fn spawn_upload<F>(
        self: &Arc<Self>,
        session: Session,
        path: impl Into<String>,
        local: PathBuf,
        on_done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), SyncError>) + Send + 'static,
    {
        let coordinator = Arc::clone(self);
        let path = path.into();
        tokio::spawn(async move {
            on_done(coordinator.upload(&session, &path, &local).await);
        })
    }

    pub fn spawn_update<F>(
        self: &Arc<Self>,
        session: Session,
        path: impl Into<String>,
        local: PathBuf,
        on_done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), SyncError>) + Send + 'static,
    {
        let coordinator = Arc::clone(self);
        let path = path.into();
        tokio::spawn(async move {
            on_done(coordinator.update(&session, &path, &local).await);
        })
    }

    pub fn spawn_fetch<F>(
        self: &Arc<Self>,
        session: Session,
        path: impl Into<String>,
        on_done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Option<PathBuf>, SyncError>) + Send + 'static,
    {
        let coordinator = Arc::clone(self);
        let path = path.into();
        tokio::spawn(async move {
            on_done(coordinator.fetch(&session, &path).await);
        })
    }

    async fn transfer_and_record(
        &self,
        session: &Session,
        path: &str,
        local: &Path,
        mode: RecordWrite,
    ) -> Result<(), SyncError> {
        let lock = self.locks.acquire(session, path, LockMode::Write).await?;
        let outcome = self.transfer_locked(session, path, local, mode).await;
        if let Err(err) = self.locks.release(session, &lock).await {
            warn!(path, error = %err, "failed to release write lock");
        }
        outcome
    }

    async fn transfer_locked(
        &self,
        session: &Session,
        path: &str,
        local: &Path,
        mode: RecordWrite,
    ) -> Result<(), SyncError> {
        let process = Process::upload(session, local, object_key(&session.user_id, path));
        self.scheduler.add_process(Arc::clone(&process))?;
        process.wait_terminal(self.process_poll).await;
        if process.has_error() {
            return Err(SyncError::TransferFailed(path.to_string()));
        }

        let modified = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let key = record_key(&session.user_id, path);
        let remote = self.remote.as_ref();
        let key_ref = key.as_str();
        let stored = match mode {
            RecordWrite::Replace => {
                let record = RemoteNode::file(modified.as_str()).to_value();
                let record_ref = &record;
                self.retry
                    .run("record_write", None, move || {
                        remote.write(session, key_ref, record_ref)
                    })
                    .await?
            }
            RecordWrite::Refresh => {
                let patch = json!({ "modified": modified });
                let patch_ref = &patch;
                self.retry
                    .run("record_update", None, move || {
                        remote.update(session, key_ref, patch_ref)
                    })
                    .await?
            }
        };
        stored.ok_or_else(|| SyncError::Unavailable(path.to_string()))?;
        info!(path, modified = %modified, "stored");
        Ok(())
    }

    async fn owned_tree(&self, session: &Session, path: &str) -> Result<RemoteNode, SyncError> {
        let key = owned_tree_key(&session.user_id);
        let remote = self.remote.as_ref();
        let key_ref = key.as_str();
        let value = self
            .retry
            .run("owned_tree_read", None, move || remote.read(session, key_ref))
            .await?
            .ok_or_else(|| SyncError::Unavailable(path.to_string()))?;
        Ok(value
            .as_ref()
            .and_then(RemoteNode::from_value)
            .unwrap_or_else(RemoteNode::empty_folder))
    }
}

/// Encoded segments of a file path; the same rule the cache applies.
fn ensure_file_path(path: &str) -> Result<Vec<String>, SyncError> {
    let segments =
        paths::cloud_segments(path).map_err(|_| SyncError::InvalidPath(path.to_string()))?;
    Ok(segments.into_iter().map(codec::encode).collect())
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
