//! Reqwest-backed device-registry adapter.
//!
//! Only the timezone attribute is of interest here; it feeds the template
//! environment for time-bucketed views.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::domain::ports::{DeviceRegistry, DeviceRegistryError};

use super::identity::{body_preview, TokenSource};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const TIMEZONE_ATTRIBUTE: &str = "timezone";

#[derive(Debug, Deserialize)]
struct DeviceDto {
    #[serde(default)]
    attributes: Vec<DeviceAttributeDto>,
}

#[derive(Debug, Deserialize)]
struct DeviceAttributeDto {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

/// Device-registry adapter reading device attributes.
pub struct HttpDeviceRegistry {
    client: Client,
    base_url: String,
    tokens: Arc<TokenSource>,
}

impl HttpDeviceRegistry {
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
impl DeviceRegistry for HttpDeviceRegistry {
    async fn device_timezone(
        &self,
        device_id: &str,
    ) -> Result<Option<String>, DeviceRegistryError> {
        let token = self
            .tokens
            .bearer()
            .await
            .map_err(|err| DeviceRegistryError::transport(err.to_string()))?;
        let url = format!("{}/devices/{device_id}", self.base_url);
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
        let device: DeviceDto = serde_json::from_slice(&body)
            .map_err(|err| DeviceRegistryError::decode(format!("invalid device payload: {err}")))?;
        Ok(timezone_attribute(&device))
    }
}

fn timezone_attribute(device: &DeviceDto) -> Option<String> {
    device
        .attributes
        .iter()
        .find(|attribute| attribute.key == TIMEZONE_ATTRIBUTE && !attribute.value.is_empty())
        .map(|attribute| attribute.value.clone())
}

fn map_transport_error(error: reqwest::Error) -> DeviceRegistryError {
    DeviceRegistryError::transport(error.to_string())
}

fn map_status_error(status: StatusCode, body: &[u8]) -> DeviceRegistryError {
    DeviceRegistryError::status(status.as_u16(), body_preview(body))
}

#[cfg(test)]
mod tests {
    //! Coverage for the non-network mapping helpers.
    use super::*;

    #[test]
    fn extracts_the_timezone_attribute() {
        let device: DeviceDto = serde_json::from_str(
            r#"{"attributes": [
                {"key": "color", "value": "blue"},
                {"key": "timezone", "value": "Europe/Berlin"}
            ]}"#,
        )
        .expect("decode");
        assert_eq!(
            timezone_attribute(&device),
            Some("Europe/Berlin".to_string())
        );
    }

    #[test]
    fn missing_or_empty_timezone_yields_none() {
        let without: DeviceDto =
            serde_json::from_str(r#"{"attributes": [{"key": "color", "value": "blue"}]}"#)
                .expect("decode");
        assert_eq!(timezone_attribute(&without), None);

        let empty: DeviceDto =
            serde_json::from_str(r#"{"attributes": [{"key": "timezone", "value": ""}]}"#)
                .expect("decode");
        assert_eq!(timezone_attribute(&empty), None);

        let no_attributes: DeviceDto = serde_json::from_str("{}").expect("decode");
        assert_eq!(timezone_attribute(&no_attributes), None);
    }
}
