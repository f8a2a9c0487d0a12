use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    BaseUrl(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("object {0} has no download token")]
    MissingDownloadToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Client for the key-path addressed dictionary store.
///
/// Every key is a `/`-separated path below the database root; values are
/// arbitrary JSON. Missing keys read back as `None`.
#[derive(Clone)]
pub struct DatabaseClient {
    http: Client,
    base_url: Url,
}

impl DatabaseClient {
    pub fn new(base_url: &str) -> Result<Self, CloudError> {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: &str) -> Result<Self, CloudError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(CloudError::BaseUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    pub async fn read(&self, key: &str, token: &str) -> Result<Option<Value>, CloudError> {
        let url = self.endpoint(key, token)?;
        let response = self.http.get(url).send().await?;
        let value: Value = handle_response(response).await?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    /// Replaces the value stored at `key`, creating intermediate nodes.
    pub async fn write(&self, key: &str, value: &Value, token: &str) -> Result<(), CloudError> {
        let url = self.endpoint(key, token)?;
        let response = self.http.put(url).json(value).send().await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    /// Merges the children of `value` into the node stored at `key`.
    pub async fn update(&self, key: &str, value: &Value, token: &str) -> Result<(), CloudError> {
        let url = self.endpoint(key, token)?;
        let response = self.http.patch(url).json(value).send().await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str, token: &str) -> Result<(), CloudError> {
        let url = self.endpoint(key, token)?;
        let response = self.http.delete(url).send().await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    fn endpoint(&self, key: &str, token: &str) -> Result<Url, CloudError> {
        let mut url = self.base_url.clone();
        let mut segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        let last = format!("{}.json", segments.pop().unwrap_or_default());
        url.path_segments_mut()
            .map_err(|_| CloudError::BaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments)
            .push(&last);
        url.query_pairs_mut().append_pair("auth", token);
        Ok(url)
    }
}

pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CloudError> {
    if response.status().is_success() {
        Ok(response.json::<T>().await?)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Api { status, body })
    }
}

impl CloudError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CloudError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// True when the failure says nothing about the request itself: the
    /// backend could not be reached or asked us to come back later.
    pub fn is_connectivity(&self) -> bool {
        match self {
            CloudError::Request(err) => is_transport_failure(err),
            CloudError::Api { .. } => self.is_retryable(),
            _ => false,
        }
    }
}

/// The request never produced a complete response: the connection could not
/// be made, was dropped, timed out, or the body was cut off.
pub fn is_transport_failure(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
}

/// Statuses that mean "try again later" rather than "the request is wrong".
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        classify_api_status(status),
        ApiErrorClass::RateLimit | ApiErrorClass::Transient
    )
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
