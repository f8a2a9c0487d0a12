use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use grass_core::{AuthClient, DatabaseClient, Session, StorageClient};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{SessionSource, SyncConfig};
use crate::remote::{FirebaseRemote, RemoteStore};
use crate::sync::coordinator::{ListEntry, SyncCoordinator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload { path: String, local: PathBuf },
    Update { path: String, local: PathBuf },
    Fetch { path: String },
    Delete { path: String },
    List { path: String },
    Shared,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Upload { .. } => "upload",
            Command::Update { .. } => "update",
            Command::Fetch { .. } => "fetch",
            Command::Delete { .. } => "delete",
            Command::List { .. } => "list",
            Command::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Done,
    Fetched(Option<PathBuf>),
    Listing(Vec<ListEntry>),
    Users(Vec<String>),
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Done => write!(f, "ok"),
            CommandOutput::Fetched(Some(path)) => write!(f, "{}", path.display()),
            CommandOutput::Fetched(None) => write!(f, "file is not available"),
            CommandOutput::Listing(entries) => {
                for entry in entries {
                    let kind = if entry.is_folder { "dir " } else { "file" };
                    let modified = entry.modified.as_deref().unwrap_or("-");
                    writeln!(f, "{kind}  {modified:<32}  {}", entry.name)?;
                }
                Ok(())
            }
            CommandOutput::Users(users) => {
                for user in users {
                    writeln!(f, "{user}")?;
                }
                Ok(())
            }
        }
    }
}

pub struct GrassDaemon {
    session: Session,
    coordinator: Arc<SyncCoordinator>,
}

impl GrassDaemon {
    pub async fn bootstrap(config: SyncConfig, source: SessionSource) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.cache_root)
            .await
            .with_context(|| format!("failed to create cache root at {:?}", config.cache_root))?;

        let session = resolve_session(&config, source).await?;
        let database = DatabaseClient::new(&config.database_url)
            .with_context(|| format!("invalid database url {}", config.database_url))?;
        let storage = StorageClient::with_base_url(&config.storage_url, &config.storage_bucket)
            .with_context(|| format!("invalid storage url {}", config.storage_url))?;
        let remote: Arc<dyn RemoteStore> = Arc::new(FirebaseRemote::new(database, storage));

        Ok(Self::with_remote(session, remote, &config))
    }

    pub fn with_remote(session: Session, remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        let coordinator = Arc::new(SyncCoordinator::new(remote, config.sync_settings()));
        info!(
            user = %session.user_id,
            cache_root = %config.cache_root.display(),
            "sync coordinator ready"
        );
        Self {
            session,
            coordinator,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<CommandOutput> {
        ensure_fresh(&self.session, OffsetDateTime::now_utc().unix_timestamp())?;
        let name = command.name();
        let session = &self.session;
        let coordinator = &self.coordinator;
        let output = match command {
            Command::Upload { path, local } => {
                coordinator
                    .upload(session, &path, &local)
                    .await
                    .with_context(|| format!("upload of {path} failed"))?;
                CommandOutput::Done
            }
            Command::Update { path, local } => {
                coordinator
                    .update(session, &path, &local)
                    .await
                    .with_context(|| format!("update of {path} failed"))?;
                CommandOutput::Done
            }
            Command::Fetch { path } => CommandOutput::Fetched(
                coordinator
                    .fetch(session, &path)
                    .await
                    .with_context(|| format!("fetch of {path} failed"))?,
            ),
            Command::Delete { path } => {
                coordinator
                    .delete(session, &path)
                    .await
                    .with_context(|| format!("delete of {path} failed"))?;
                CommandOutput::Done
            }
            Command::List { path } => CommandOutput::Listing(
                coordinator
                    .list(session, &path)
                    .await
                    .with_context(|| format!("listing {path} failed"))?,
            ),
            Command::Shared => CommandOutput::Users(
                coordinator
                    .access_list(session)
                    .await
                    .context("reading the access list failed")?,
            ),
        };
        info!(command = name, "command finished");
        Ok(output)
    }

    /// Releases leftover locks and drains the transfer queue.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let released = self.coordinator.end_session(&self.session).await;
        if released > 0 {
            warn!(released, "released locks left over by the session");
        }
        self.coordinator
            .shutdown()
            .await
            .context("transfer worker did not stop cleanly")
    }
}

pub async fn resolve_session(config: &SyncConfig, source: SessionSource) -> anyhow::Result<Session> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    match source {
        SessionSource::Token {
            user_id,
            id_token,
            expires_at,
        } => {
            let session = Session {
                expires_at,
                ..Session::new(user_id, id_token)
            };
            ensure_fresh(&session, now)?;
            Ok(session)
        }
        SessionSource::Password { email, password } => {
            let api_key = config
                .api_key
                .as_deref()
                .context("GRASS_API_KEY is required for password sign-in")?;
            let auth = AuthClient::with_base_url(&config.auth_url, api_key)
                .with_context(|| format!("invalid auth url {}", config.auth_url))?;
            let session = auth
                .sign_in(&email, &password, now)
                .await
                .context("sign-in failed")?;
            info!(user = %session.user_id, "signed in");
            Ok(session)
        }
    }
}

/// Refuses to act on a session whose token has run out.
fn ensure_fresh(session: &Session, now_unix: i64) -> anyhow::Result<()> {
    if session.is_expired_at(now_unix) {
        anyhow::bail!(
            "session for {} expired at {}; sign in again",
            session.user_id,
            session.expires_at.unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
