use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use grass_core::Session;
use tracing::{debug, warn};

use super::retry::{ErrorFlag, RetryGuard};
use crate::remote::RemoteStore;

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Failed)
    }

    fn to_u8(self) -> u8 {
        match self {
            ProcessStatus::Pending => 0,
            ProcessStatus::Running => 1,
            ProcessStatus::Completed => 2,
            ProcessStatus::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessStatus::Pending,
            1 => ProcessStatus::Running,
            2 => ProcessStatus::Completed,
            _ => ProcessStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessKind {
    /// Sends a local file to the blob store under `object_key`.
    Upload { source: PathBuf, object_key: String },
    /// Materializes the blob behind `url` at `target`.
    Download { url: String, target: PathBuf },
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Upload { .. } => "upload",
            ProcessKind::Download { .. } => "download",
        }
    }
}

/// One scheduled transfer.
///
/// Shared between the caller, who polls it, and the scheduler worker, who
/// drives it. Status only ever moves forward:
/// `pending -> running -> completed | failed`.
#[derive(Debug)]
pub struct Process {
    id: u64,
    kind: ProcessKind,
    session: Session,
    status: AtomicU8,
    error: AtomicBool,
}

impl Process {
    pub fn new(session: &Session, kind: ProcessKind) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            session: session.clone(),
            status: AtomicU8::new(ProcessStatus::Pending.to_u8()),
            error: AtomicBool::new(false),
        })
    }

    pub fn upload(session: &Session, source: &Path, object_key: impl Into<String>) -> Arc<Self> {
        Self::new(
            session,
            ProcessKind::Upload {
                source: source.to_path_buf(),
                object_key: object_key.into(),
            },
        )
    }

    pub fn download(session: &Session, url: impl Into<String>, target: &Path) -> Arc<Self> {
        Self::new(
            session,
            ProcessKind::Download {
                url: url.into(),
                target: target.to_path_buf(),
            },
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &ProcessKind {
        &self.kind
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// Polls until the process reaches a terminal state.
    pub async fn wait_terminal(&self, poll_interval: Duration) -> ProcessStatus {
        loop {
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            debug!(
                process = self.id,
                kind = self.kind.as_str(),
                status = status.as_str(),
                "waiting for transfer"
            );
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.transition(ProcessStatus::Pending, ProcessStatus::Running)
    }

    pub(crate) fn finish(&self, succeeded: bool) -> ProcessStatus {
        let terminal = if succeeded && !self.has_error() {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed
        };
        // The flag must be visible before pollers can observe `failed`.
        if terminal == ProcessStatus::Failed && self.status() == ProcessStatus::Running {
            self.raise_error();
        }
        self.transition(ProcessStatus::Running, terminal);
        self.status()
    }

    fn transition(&self, from: ProcessStatus, to: ProcessStatus) -> bool {
        self.status
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runs the transfer. Returns whether it succeeded; a `false` always
    /// comes with the error flag raised.
    pub(crate) async fn execute(&self, remote: &dyn RemoteStore, retry: &RetryGuard) -> bool {
        let session = &self.session;
        let outcome = match &self.kind {
            ProcessKind::Upload { source, object_key } => {
                let (source, object_key) = (source.as_path(), object_key.as_str());
                retry
                    .run("blob_put", Some(self), move || {
                        remote.blob_put(session, object_key, source)
                    })
                    .await
            }
            ProcessKind::Download { url, target } => {
                let (url, target) = (url.as_str(), target.as_path());
                retry
                    .run("blob_fetch", Some(self), move || remote.blob_fetch(url, target))
                    .await
            }
        };

        match outcome {
            Ok(Some(())) => true,
            Ok(None) => false,
            Err(err) => {
                warn!(process = self.id, kind = self.kind.as_str(), error = %err, "transfer failed");
                self.raise_error();
                false
            }
        }
    }
}

impl ErrorFlag for Process {
    fn raise_error(&self) {
        self.error.store(true, Ordering::Release);
    }
}
