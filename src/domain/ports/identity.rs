//! Outbound port for the identity provider.

use async_trait::async_trait;
use serde::Deserialize;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by the identity-provider client.
    pub enum IdentityClientError {
        /// Token endpoint or admin API could not be reached.
        Transport { message: String } => "identity provider transport failed: {message}",
        /// The provider answered with an unexpected status.
        Status { status: u16, message: String } =>
            "identity provider returned status {status}: {message}",
        /// The response body could not be decoded.
        Decode { message: String } => "identity provider response invalid: {message}",
    }
}

/// A realm-level role attached to a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleMapping {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

/// Port for enumerating a user's realm-role mappings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn realm_role_mappings(
        &self,
        user_id: &str,
    ) -> Result<Vec<RoleMapping>, IdentityClientError>;
}
