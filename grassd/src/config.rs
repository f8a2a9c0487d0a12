use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::sync::coordinator::SyncSettings;
use crate::sync::retry::{DEFAULT_MAX_RETRIES, RetryGuard};

const DEFAULT_STORAGE_URL: &str = "https://firebasestorage.googleapis.com";
const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com";
const DEFAULT_RETRY_BACKOFF_MS: u64 = 5000;
const DEFAULT_LOCK_POLL_MS: u64 = 1000;
const DEFAULT_PROCESS_POLL_MS: u64 = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: String,
    pub storage_url: String,
    pub storage_bucket: String,
    pub auth_url: String,
    pub api_key: Option<String>,
    pub cache_root: PathBuf,
    pub retry_max: u32,
    pub retry_backoff: Duration,
    pub lock_poll: Duration,
    pub process_poll: Duration,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("GRASS_DATABASE_URL").context("GRASS_DATABASE_URL is not set")?;
        let storage_bucket =
            lookup("GRASS_STORAGE_BUCKET").context("GRASS_STORAGE_BUCKET is not set")?;
        let storage_url =
            lookup("GRASS_STORAGE_URL").unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string());
        let auth_url = lookup("GRASS_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.to_string());
        let api_key = lookup("GRASS_API_KEY").filter(|value| !value.is_empty());
        let cache_root = lookup("GRASS_CACHE_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(default_cache_root);
        let retry_max = read_u32(&lookup, "GRASS_RETRY_MAX", DEFAULT_MAX_RETRIES);
        let retry_backoff = Duration::from_millis(read_u64(
            &lookup,
            "GRASS_RETRY_BACKOFF_MS",
            DEFAULT_RETRY_BACKOFF_MS,
        ));
        let lock_poll =
            Duration::from_millis(read_u64(&lookup, "GRASS_LOCK_POLL_MS", DEFAULT_LOCK_POLL_MS));
        let process_poll = Duration::from_millis(read_u64(
            &lookup,
            "GRASS_PROCESS_POLL_MS",
            DEFAULT_PROCESS_POLL_MS,
        ));

        Ok(Self {
            database_url,
            storage_url,
            storage_bucket,
            auth_url,
            api_key,
            cache_root,
            retry_max,
            retry_backoff,
            lock_poll,
            process_poll,
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            cache_root: self.cache_root.clone(),
            retry: RetryGuard::new(self.retry_max, self.retry_backoff),
            lock_poll: self.lock_poll,
            process_poll: self.process_poll,
        }
    }
}

/// Where the signed-in identity comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// A token minted elsewhere, optionally with its expiry in unix seconds.
    Token {
        user_id: String,
        id_token: String,
        expires_at: Option<i64>,
    },
    /// Email/password sign-in through the auth endpoint.
    Password { email: String, password: String },
}

impl std::fmt::Debug for SessionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSource::Token {
                user_id,
                expires_at,
                ..
            } => f
                .debug_struct("Token")
                .field("user_id", user_id)
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            SessionSource::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

impl SessionSource {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(user_id), Some(id_token)) = (lookup("GRASS_USER_ID"), lookup("GRASS_ID_TOKEN"))
        {
            let expires_at = lookup("GRASS_TOKEN_EXPIRES_AT")
                .and_then(|value| value.trim().parse::<i64>().ok());
            return Ok(SessionSource::Token {
                user_id,
                id_token,
                expires_at,
            });
        }
        if let (Some(email), Some(password)) = (lookup("GRASS_EMAIL"), lookup("GRASS_PASSWORD")) {
            return Ok(SessionSource::Password { email, password });
        }
        anyhow::bail!(
            "no credentials: set GRASS_USER_ID and GRASS_ID_TOKEN, or GRASS_EMAIL and GRASS_PASSWORD"
        )
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("grass")
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Zero is a valid retry count: fail on the first connectivity error.
fn read_u32<F>(lookup: &F, name: &str, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
