use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid token lifetime: {0}")]
    InvalidExpiry(String),
}

/// Identity of a signed-in user. Passed by reference into every sync
/// operation and never modified by them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            id_token: id_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_unix)
    }
}

#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl AuthClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        now_unix: i64,
    ) -> Result<Session, AuthError> {
        let account = self
            .post_credentials("/v1/accounts:signInWithPassword", email, password)
            .await?;
        account.into_session(now_unix)
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        now_unix: i64,
    ) -> Result<Session, AuthError> {
        let account = self
            .post_credentials("/v1/accounts:signUp", email, password)
            .await?;
        account.into_session(now_unix)
    }

    async fn post_credentials(
        &self,
        endpoint: &str,
        email: &str,
        password: &str,
    ) -> Result<AccountResponse, AuthError> {
        let mut url = self.base_url.join(endpoint)?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        let body = CredentialsRequest {
            email,
            password,
            return_secure_token: true,
        };

        let response = self.http.post(url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(response.json::<AccountResponse>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Api { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

impl AccountResponse {
    fn into_session(self, now_unix: i64) -> Result<Session, AuthError> {
        let expires_at = match self.expires_in {
            Some(raw) => {
                let secs = raw
                    .parse::<i64>()
                    .map_err(|_| AuthError::InvalidExpiry(raw.clone()))?;
                Some(now_unix.saturating_add(secs))
            }
            None => None,
        };
        Ok(Session {
            user_id: self.local_id,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at,
        })
    }
}
