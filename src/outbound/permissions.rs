//! Reqwest-backed permission-service adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::domain::ports::{PermissionsClient, PermissionsClientError, ResourcePermissions};

use super::identity::{body_preview, TokenSource};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Permission-service adapter resolving resource grants.
pub struct HttpPermissionsClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenSource>,
}

impl HttpPermissionsClient {
    /// Build the adapter with its own request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base_url: &str, tokens: Arc<TokenSource>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl PermissionsClient for HttpPermissionsClient {
    async fn resource(
        &self,
        kind: &str,
        resource_id: &str,
    ) -> Result<ResourcePermissions, PermissionsClientError> {
        let token = self
            .tokens
            .bearer()
            .await
            .map_err(|err| PermissionsClientError::transport(err.to_string()))?;
        let url = format!("{}/resources/{kind}/{resource_id}", self.base_url);
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
        serde_json::from_slice(&body).map_err(|err| {
            PermissionsClientError::decode(format!("invalid resource payload: {err}"))
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> PermissionsClientError {
    PermissionsClientError::transport(error.to_string())
}

fn map_status_error(status: StatusCode, body: &[u8]) -> PermissionsClientError {
    PermissionsClientError::status(status.as_u16(), body_preview(body))
}

#[cfg(test)]
mod tests {
    //! Coverage for the non-network mapping helpers.
    use super::*;

    #[test]
    fn decodes_resource_grants() {
        let body = r#"{
            "role_permissions": {"admin": {"read": true, "write": true, "execute": true}},
            "user_permissions": {"u-1": {"execute": true}, "u-2": {"read": true}}
        }"#;
        let resource: ResourcePermissions = serde_json::from_str(body).expect("decode");
        assert_eq!(resource.roles_with_execute(), vec!["admin".to_string()]);
        assert_eq!(resource.users_with_execute(), vec!["u-1".to_string()]);
    }

    #[test]
    fn status_errors_carry_the_code() {
        let err = map_status_error(StatusCode::NOT_FOUND, b"no such resource");
        assert!(matches!(
            err,
            PermissionsClientError::Status { status: 404, .. }
        ));
    }
}
