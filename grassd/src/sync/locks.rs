use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use grass_core::Session;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::codec;
use super::layout::lock_table_key;
use super::retry::RetryGuard;
use crate::remote::{RemoteError, RemoteStore};

pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("lock table unreachable for {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(LockMode::Read),
            "write" => Some(LockMode::Write),
            _ => None,
        }
    }

    /// Writers exclude everyone; readers only exclude writers.
    pub fn conflicts_with(self, held: LockMode) -> bool {
        matches!(
            (self, held),
            (LockMode::Write, _) | (LockMode::Read, LockMode::Write)
        )
    }
}

/// A lock held by this process on one `(scope, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockRef {
    pub scope: String,
    pub key: String,
    pub holder: String,
    pub mode: LockMode,
}

impl LockRef {
    fn entry_key(&self) -> String {
        format!("{}/{}/{}", lock_table_key(&self.scope), self.key, self.holder)
    }
}

/// Cooperative read/write locks over cloud paths, stored in the remote
/// dictionary under `locks/<scope>/<flat key>/<holder>`.
///
/// Acquisition reads the table, and once nothing conflicts, writes its own
/// entry. There is no compare-and-swap between the two steps, so two clients
/// that both observe a free key can both end up holding it.
pub struct PathLockManager {
    remote: Arc<dyn RemoteStore>,
    retry: RetryGuard,
    poll_interval: Duration,
    held: Mutex<Vec<LockRef>>,
}

impl PathLockManager {
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryGuard, poll_interval: Duration) -> Self {
        Self {
            remote,
            retry,
            poll_interval,
            held: Mutex::new(Vec::new()),
        }
    }

    /// Blocks (by polling) until `mode` is compatible with every entry on
    /// `path`, then records this holder. Waits without a deadline.
    pub async fn acquire(
        &self,
        session: &Session,
        path: &str,
        mode: LockMode,
    ) -> Result<LockRef, LockError> {
        let scope = session.user_id.as_str();
        let key = codec::encode_flat(path);
        let mut polls = 0u64;

        loop {
            let table = self.read_table(session, scope).await?;
            let conflict = holders(table.as_ref(), &key).any(|held| mode.conflicts_with(held));
            if !conflict {
                break;
            }
            polls += 1;
            debug!(path, mode = mode.as_str(), polls, "lock busy, polling");
            tokio::time::sleep(self.poll_interval).await;
        }

        let lock = LockRef {
            scope: scope.to_string(),
            key,
            holder: new_holder_id(),
            mode,
        };
        let entry_key = lock.entry_key();
        let value = json!(mode.as_str());
        let remote = self.remote.as_ref();
        let (entry, value_ref) = (entry_key.as_str(), &value);
        self.retry
            .run("lock_write", None, move || remote.write(session, entry, value_ref))
            .await?
            .ok_or_else(|| LockError::Unavailable(path.to_string()))?;

        self.held_locks_mut().push(lock.clone());
        info!(path, mode = mode.as_str(), holder = %lock.holder, polls, "lock acquired");
        Ok(lock)
    }

    pub async fn release(&self, session: &Session, lock: &LockRef) -> Result<(), LockError> {
        let entry_key = lock.entry_key();
        let remote = self.remote.as_ref();
        let entry = entry_key.as_str();
        self.retry
            .run("lock_delete", None, move || remote.delete(session, entry))
            .await?
            .ok_or_else(|| LockError::Unavailable(codec::decode_flat(&lock.key)))?;

        self.held_locks_mut().retain(|held| held != lock);
        debug!(key = %lock.key, holder = %lock.holder, "lock released");
        Ok(())
    }

    /// Releases every lock still held for the session's scope. Failures are
    /// logged and the lock stays on the held list. Returns how many were
    /// released.
    pub async fn release_all(&self, session: &Session) -> usize {
        let pending: Vec<LockRef> = self
            .held_locks_mut()
            .iter()
            .filter(|lock| lock.scope == session.user_id)
            .cloned()
            .collect();

        let mut released = 0;
        for lock in &pending {
            match self.release(session, lock).await {
                Ok(()) => released += 1,
                Err(err) => warn!(
                    key = %lock.key,
                    holder = %lock.holder,
                    error = %err,
                    "failed to release lock"
                ),
            }
        }
        if !pending.is_empty() {
            info!(released, total = pending.len(), "released session locks");
        }
        released
    }

    pub fn held_locks(&self) -> Vec<LockRef> {
        self.held_locks_mut().clone()
    }

    async fn read_table(&self, session: &Session, scope: &str) -> Result<Option<Value>, LockError> {
        let table_key = lock_table_key(scope);
        let remote = self.remote.as_ref();
        let table = table_key.as_str();
        let snapshot = self
            .retry
            .run("lock_table_read", None, move || remote.read(session, table))
            .await?
            .ok_or_else(|| LockError::Unavailable(table_key.clone()))?;
        Ok(snapshot)
    }

    fn held_locks_mut(&self) -> std::sync::MutexGuard<'_, Vec<LockRef>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Modes currently held on `key`. A bare string entry (single anonymous
/// holder) is accepted alongside the per-holder map.
fn holders<'a>(table: Option<&'a Value>, key: &str) -> Box<dyn Iterator<Item = LockMode> + 'a> {
    match table.and_then(|table| table.get(key)) {
        Some(Value::String(mode)) => Box::new(LockMode::parse(mode).into_iter()),
        Some(Value::Object(entries)) => Box::new(
            entries
                .values()
                .filter_map(|value| value.as_str().and_then(LockMode::parse)),
        ),
        _ => Box::new(std::iter::empty()),
    }
}

fn new_holder_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
