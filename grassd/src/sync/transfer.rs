use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use grass_core::{is_transient_status, is_transport_failure};
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response body interrupted: {0}")]
    Interrupted(#[source] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl TransferError {
    pub fn is_connectivity(&self) -> bool {
        match self {
            TransferError::Request(err) => {
                is_transport_failure(err) || err.status().is_some_and(is_transient_status)
            }
            TransferError::Interrupted(_) => true,
            TransferError::Io(_) | TransferError::Url(_) => false,
        }
    }
}

/// Streams file bodies to and from pre-resolved URLs.
#[derive(Clone, Default)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }

    /// Downloads into a `.partial` sibling and renames it over `target` once
    /// the body is complete.
    pub async fn download_to_path(&self, href: &str, target: &Path) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(TransferError::Interrupted(err));
                }
            };
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    pub async fn upload_from_path(
        &self,
        href: &Url,
        source: &Path,
        authorization: &str,
    ) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        self.http
            .post(href.clone())
            .header("Authorization", authorization)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
