use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::remote::RemoteError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Something that records that the work it owns has failed for good.
pub trait ErrorFlag: Send + Sync {
    fn raise_error(&self);
}

/// Bounded retry for remote calls.
///
/// Only connectivity failures are retried, after a fixed backoff. When every
/// attempt failed the owner's error flag is raised and the call yields
/// `Ok(None)`; any other failure is returned as is on the first occurrence.
#[derive(Debug, Clone, Copy)]
pub struct RetryGuard {
    max_retries: u32,
    backoff: Duration,
}

impl Default for RetryGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF)
    }
}

impl RetryGuard {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        owner: Option<&dyn ErrorFlag>,
        mut op: F,
    ) -> Result<Option<T>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let attempts = self.max_attempts();
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) if err.is_connectivity() => {
                    warn!(
                        call = what,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "remote call failed, retrying"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(owner) = owner {
            owner.raise_error();
        }
        error!(call = what, attempts, "giving up after repeated connectivity failures");
        Ok(None)
    }
}
