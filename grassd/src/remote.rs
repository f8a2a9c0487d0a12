use std::path::Path;

use async_trait::async_trait;
use grass_core::{CloudError, DatabaseClient, Session, StorageClient, auth_header_value};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::sync::transfer::{TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cloud api error: {0}")]
    Cloud(#[from] CloudError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

impl RemoteError {
    /// Connectivity failures are the only ones worth retrying.
    pub fn is_connectivity(&self) -> bool {
        match self {
            RemoteError::Cloud(err) => err.is_connectivity(),
            RemoteError::Transfer(err) => err.is_connectivity(),
            RemoteError::Unreachable(_) => true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RemoteError::Cloud(CloudError::Api { status, .. }) if *status == StatusCode::NOT_FOUND
        )
    }
}

/// Backend seen by the sync core: a key-path dictionary store plus a blob
/// store. Every call is fallible and may fail with a connectivity error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read(&self, session: &Session, key: &str) -> Result<Option<Value>, RemoteError>;

    async fn write(&self, session: &Session, key: &str, value: &Value) -> Result<(), RemoteError>;

    /// Merges the children of `value` into the node at `key`.
    async fn update(&self, session: &Session, key: &str, value: &Value)
    -> Result<(), RemoteError>;

    async fn delete(&self, session: &Session, key: &str) -> Result<(), RemoteError>;

    async fn blob_put(
        &self,
        session: &Session,
        object_key: &str,
        source: &Path,
    ) -> Result<(), RemoteError>;

    /// Resolves a URL that [`RemoteStore::blob_fetch`] can read without
    /// further credentials.
    async fn blob_url(&self, session: &Session, object_key: &str) -> Result<String, RemoteError>;

    async fn blob_fetch(&self, url: &str, target: &Path) -> Result<(), RemoteError>;

    async fn blob_delete(&self, session: &Session, object_key: &str) -> Result<(), RemoteError>;
}

/// [`RemoteStore`] over the realtime database and storage REST APIs.
#[derive(Clone)]
pub struct FirebaseRemote {
    database: DatabaseClient,
    storage: StorageClient,
    transfer: TransferClient,
}

impl FirebaseRemote {
    pub fn new(database: DatabaseClient, storage: StorageClient) -> Self {
        Self {
            database,
            storage,
            transfer: TransferClient::new(),
        }
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }
}

#[async_trait]
impl RemoteStore for FirebaseRemote {
    async fn read(&self, session: &Session, key: &str) -> Result<Option<Value>, RemoteError> {
        Ok(self.database.read(key, &session.id_token).await?)
    }

    async fn write(&self, session: &Session, key: &str, value: &Value) -> Result<(), RemoteError> {
        Ok(self.database.write(key, value, &session.id_token).await?)
    }

    async fn update(
        &self,
        session: &Session,
        key: &str,
        value: &Value,
    ) -> Result<(), RemoteError> {
        Ok(self.database.update(key, value, &session.id_token).await?)
    }

    async fn delete(&self, session: &Session, key: &str) -> Result<(), RemoteError> {
        Ok(self.database.delete(key, &session.id_token).await?)
    }

    async fn blob_put(
        &self,
        session: &Session,
        object_key: &str,
        source: &Path,
    ) -> Result<(), RemoteError> {
        let href = self.storage.upload_url(object_key)?;
        self.transfer
            .upload_from_path(&href, source, &auth_header_value(&session.id_token))
            .await?;
        Ok(())
    }

    async fn blob_url(&self, session: &Session, object_key: &str) -> Result<String, RemoteError> {
        let url = self
            .storage
            .get_download_url(object_key, &session.id_token)
            .await?;
        Ok(url.to_string())
    }

    async fn blob_fetch(&self, url: &str, target: &Path) -> Result<(), RemoteError> {
        Ok(self.transfer.download_to_path(url, target).await?)
    }

    async fn blob_delete(&self, session: &Session, object_key: &str) -> Result<(), RemoteError> {
        Ok(self
            .storage
            .delete_object(object_key, &session.id_token)
            .await?)
    }
}
