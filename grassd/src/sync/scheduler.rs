use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::process::{Process, ProcessStatus};
use super::retry::RetryGuard;
use crate::remote::RemoteStore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("process scheduler has shut down")]
    Closed,
    #[error("scheduler worker panicked")]
    WorkerPanicked,
}

/// FIFO queue of transfers drained by a single worker task.
///
/// Every upload and download goes through the one worker, so at most one
/// transfer is in flight and transfers submitted by one caller run in
/// submission order. A failed process never stops the worker.
pub struct ProcessScheduler {
    queue: Mutex<Option<mpsc::UnboundedSender<Arc<Process>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessScheduler {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(remote: Arc<dyn RemoteStore>, retry: RetryGuard) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, remote, retry));
        Self {
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn add_process(&self, process: Arc<Process>) -> Result<(), SchedulerError> {
        debug!(
            process = process.id(),
            kind = process.kind().as_str(),
            "queueing transfer"
        );
        let queue = lock(&self.queue);
        let sender = queue.as_ref().ok_or(SchedulerError::Closed)?;
        sender.send(process).map_err(|_| SchedulerError::Closed)
    }

    pub fn is_completed(&self, process: &Process) -> bool {
        process.is_completed()
    }

    /// Stops accepting work, lets the worker drain what is queued and waits
    /// for it to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        drop(lock(&self.queue).take());
        let worker = lock(&self.worker).take();
        match worker {
            Some(worker) => worker.await.map_err(|_| SchedulerError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Arc<Process>>,
    remote: Arc<dyn RemoteStore>,
    retry: RetryGuard,
) {
    info!("process scheduler started");
    while let Some(process) = rx.recv().await {
        if !process.mark_running() {
            warn!(process = process.id(), "process was already started, skipping");
            continue;
        }
        let succeeded = process.execute(remote.as_ref(), &retry).await;
        let status = process.finish(succeeded);
        match status {
            ProcessStatus::Completed => debug!(
                process = process.id(),
                kind = process.kind().as_str(),
                "transfer completed"
            ),
            _ => warn!(
                process = process.id(),
                kind = process.kind().as_str(),
                status = status.as_str(),
                "transfer did not complete"
            ),
        }
    }
    info!("process scheduler stopped");
}
