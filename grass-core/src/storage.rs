use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::{CloudError, handle_response};

const DEFAULT_BASE_URL: &str = "https://firebasestorage.googleapis.com";

/// Client for the binary object store of one bucket.
///
/// Uploading bytes is left to the caller (see [`StorageClient::upload_url`]) so
/// the body can be streamed from disk.
#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    base_url: Url,
    bucket: String,
}

impl StorageClient {
    pub fn new(bucket: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_base_url(DEFAULT_BASE_URL, bucket)
    }

    pub fn with_base_url(base_url: &str, bucket: impl Into<String>) -> Result<Self, CloudError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(CloudError::BaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            bucket: bucket.into(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Target for a media upload of `object_key`; the body is the raw file.
    pub fn upload_url(&self, object_key: &str) -> Result<Url, CloudError> {
        let mut url = self.bucket_endpoint(None)?;
        url.query_pairs_mut().append_pair("name", object_key);
        Ok(url)
    }

    pub async fn get_metadata(
        &self,
        object_key: &str,
        token: &str,
    ) -> Result<ObjectMetadata, CloudError> {
        let url = self.bucket_endpoint(Some(object_key))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", auth_header_value(token))
            .send()
            .await?;
        handle_response(response).await
    }

    /// Resolves a tokenized media URL that can be fetched without headers.
    pub async fn get_download_url(&self, object_key: &str, token: &str) -> Result<Url, CloudError> {
        let metadata = self.get_metadata(object_key, token).await?;
        let download_token = metadata
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CloudError::MissingDownloadToken(object_key.to_string()))?;
        let mut url = self.bucket_endpoint(Some(object_key))?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", download_token);
        Ok(url)
    }

    pub async fn delete_object(&self, object_key: &str, token: &str) -> Result<(), CloudError> {
        let url = self.bucket_endpoint(Some(object_key))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", auth_header_value(token))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Api { status, body })
    }

    fn bucket_endpoint(&self, object_key: Option<&str>) -> Result<Url, CloudError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CloudError::BaseUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().extend(["v0", "b", &self.bucket, "o"]);
            // The whole key is one segment; its slashes are escaped.
            if let Some(key) = object_key {
                segments.push(key);
            }
        }
        Ok(url)
    }
}

pub fn auth_header_value(token: &str) -> String {
    format!("Firebase {token}")
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: String,
    pub bucket: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub md5_hash: Option<String>,
    #[serde(default)]
    pub download_tokens: Option<String>,
}
