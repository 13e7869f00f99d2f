//! Reqwest-backed identity-provider adapter.
//!
//! Owns the client-credentials token flow and the realm-role-mapping
//! lookup. The token is cached and reused until shortly before expiry;
//! the cached value is shared with the other authenticated clients
//! through [`TokenSource`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::ports::{IdentityClient, IdentityClientError, RoleMapping};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Refresh margin so a token is never presented right at its expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Cached client-credentials token for the identity realm.
pub struct TokenSource {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(
        client: Client,
        identity_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/realms/master/protocol/openid-connect/token",
                identity_url.trim_end_matches('/')
            ),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    /// A bearer token valid for at least the expiry margin.
    pub async fn bearer(&self) -> Result<String, IdentityClientError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        let token: TokenResponse = serde_json::from_slice(&body).map_err(|err| {
            IdentityClientError::decode(format!("invalid token payload: {err}"))
        })?;

        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(access_token)
    }
}

/// Identity-provider adapter performing admin-API reads.
pub struct HttpIdentityClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenSource>,
}

impl HttpIdentityClient {
    /// Build the adapter and its token source.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        identity_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(Self, Arc<TokenSource>), reqwest::Error> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        let tokens = Arc::new(TokenSource::new(
            client.clone(),
            identity_url,
            client_id,
            client_secret,
        ));
        Ok((
            Self {
                client,
                base_url: identity_url.trim_end_matches('/').to_string(),
                tokens: tokens.clone(),
            },
            tokens,
        ))
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn realm_role_mappings(
        &self,
        user_id: &str,
    ) -> Result<Vec<RoleMapping>, IdentityClientError> {
        let token = self.tokens.bearer().await?;
        let url = format!(
            "{}/admin/realms/master/users/{user_id}/role-mappings/realm",
            self.base_url
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        serde_json::from_slice(&body)
            .map_err(|err| IdentityClientError::decode(format!("invalid role mappings: {err}")))
    }
}

fn map_transport_error(error: reqwest::Error) -> IdentityClientError {
    IdentityClientError::transport(error.to_string())
}

fn map_status_error(status: StatusCode, body: &[u8]) -> IdentityClientError {
    IdentityClientError::status(status.as_u16(), body_preview(body))
}

pub(crate) fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
