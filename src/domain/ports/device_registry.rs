//! Outbound port for the device registry.

use async_trait::async_trait;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by the device-registry client.
    pub enum DeviceRegistryError {
        /// The registry could not be reached.
        Transport { message: String } => "device registry transport failed: {message}",
        /// The registry answered with an unexpected status.
        Status { status: u16, message: String } =>
            "device registry returned status {status}: {message}",
        /// The response body could not be decoded.
        Decode { message: String } => "device registry response invalid: {message}",
    }
}

/// Port for reading device attributes relevant to rendering.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// The device's timezone attribute, if one is recorded.
    async fn device_timezone(
        &self,
        device_id: &str,
    ) -> Result<Option<String>, DeviceRegistryError>;
}
