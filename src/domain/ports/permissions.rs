//! Outbound port for the permission service.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by the permission-service client.
    pub enum PermissionsClientError {
        /// The service could not be reached or timed out.
        Transport { message: String } => "permission service transport failed: {message}",
        /// The service answered with an unexpected status.
        Status { status: u16, message: String } =>
            "permission service returned status {status}: {message}",
        /// The response body could not be decoded.
        Decode { message: String } => "permission service response invalid: {message}",
    }
}

/// Per-principal grant flags on a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionFlags {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub administrate: bool,
}

/// Grants on a single resource, keyed by role name and by user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourcePermissions {
    #[serde(default)]
    pub role_permissions: HashMap<String, PermissionFlags>,
    #[serde(default)]
    pub user_permissions: HashMap<String, PermissionFlags>,
}

impl ResourcePermissions {
    /// Role names holding the execute grant.
    pub fn roles_with_execute(&self) -> Vec<String> {
        let mut roles: Vec<String> = self
            .role_permissions
            .iter()
            .filter(|(_, flags)| flags.execute)
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }

    /// User ids holding the execute grant.
    pub fn users_with_execute(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .user_permissions
            .iter()
            .filter(|(_, flags)| flags.execute)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }
}

/// Port for resolving resource ownership from the permission service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionsClient: Send + Sync {
    /// Fetch the grants recorded for `resource_id` of the given kind.
    async fn resource(
        &self,
        kind: &str,
        resource_id: &str,
    ) -> Result<ResourcePermissions, PermissionsClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(execute: bool) -> PermissionFlags {
        PermissionFlags {
            execute,
            ..PermissionFlags::default()
        }
    }

    #[test]
    fn filters_principals_by_execute_grant() {
        let mut permissions = ResourcePermissions::default();
        permissions.role_permissions.insert("admin".into(), flags(true));
        permissions.role_permissions.insert("viewer".into(), flags(false));
        permissions.user_permissions.insert("u2".into(), flags(true));
        permissions.user_permissions.insert("u1".into(), flags(true));
        permissions.user_permissions.insert("u3".into(), flags(false));

        assert_eq!(permissions.roles_with_execute(), vec!["admin".to_string()]);
        assert_eq!(
            permissions.users_with_execute(),
            vec!["u1".to_string(), "u2".to_string()]
        );
    }

    #[test]
    fn decodes_service_payload() {
        let permissions: ResourcePermissions = serde_json::from_str(
            r#"{
                "role_permissions": {"admin": {"read": true, "execute": true}},
                "user_permissions": {"u1": {"execute": false}}
            }"#,
        )
        .expect("decode");
        assert_eq!(permissions.roles_with_execute(), vec!["admin".to_string()]);
        assert!(permissions.users_with_execute().is_empty());
    }
}
