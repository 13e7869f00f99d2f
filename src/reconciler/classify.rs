//! Physical table name classification.
//!
//! Two naming schemes are recognized: `device:<22>_service:<22>…` and
//! `userid:<22>_export:<22>…`, where the 22-character segments are short
//! ids. Device tables additionally pull their owner sets from the
//! permission service and a timezone from the device registry.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::domain::ports::{DeviceRegistry, IdentityClient, PermissionsClient};
use crate::domain::{short_id, Error, TableInfo};

static EXPORT_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^userid:(.{22})_export:(.{22})").expect("export table regex is valid")
});
static DEVICE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^device:(.{22})_service:(.{22})").expect("device table regex is valid")
});

/// Resolves a table name into the rendering environment for its rules.
#[derive(Clone)]
pub struct TableClassifier {
    permissions: Arc<dyn PermissionsClient>,
    identity: Arc<dyn IdentityClient>,
    devices: Arc<dyn DeviceRegistry>,
    device_id_prefix: String,
    service_id_prefix: String,
    default_timezone: String,
}

impl TableClassifier {
    pub fn new(
        permissions: Arc<dyn PermissionsClient>,
        identity: Arc<dyn IdentityClient>,
        devices: Arc<dyn DeviceRegistry>,
        device_id_prefix: impl Into<String>,
        service_id_prefix: impl Into<String>,
        default_timezone: impl Into<String>,
    ) -> Self {
        Self {
            permissions,
            identity,
            devices,
            device_id_prefix: device_id_prefix.into(),
            service_id_prefix: service_id_prefix.into(),
            default_timezone: default_timezone.into(),
        }
    }

    /// Assemble the [`TableInfo`] for a table name. Unknown formats are an
    /// `InvalidRequest`; collaborator failures are `ServiceUnavailable`.
    pub async fn classify(&self, table: &str) -> Result<TableInfo, Error> {
        let mut info = TableInfo {
            table: table.to_string(),
            timezone: self.default_timezone.clone(),
            ..TableInfo::default()
        };

        if let Some(captures) = EXPORT_TABLE.captures(table) {
            debug!(table, "classified as export table");
            info.short_user_id = captures[1].to_string();
            info.user_ids = vec![expand_id(&info.short_user_id)?];
            info.short_export_id = captures[2].to_string();
            info.export_id = expand_id(&info.short_export_id)?;
            return Ok(info);
        }

        let Some(captures) = DEVICE_TABLE.captures(table) else {
            return Err(Error::invalid_request(format!(
                "unknown table format: {table}"
            )));
        };
        debug!(table, "classified as device table");
        info.short_device_id = captures[1].to_string();
        info.device_id = format!("{}{}", self.device_id_prefix, expand_id(&info.short_device_id)?);
        info.short_service_id = captures[2].to_string();
        info.service_id = format!(
            "{}{}",
            self.service_id_prefix,
            expand_id(&info.short_service_id)?
        );

        let resource = self
            .permissions
            .resource("devices", &info.device_id)
            .await
            .map_err(|err| {
                Error::unavailable(format!("{err}, device: {}", info.device_id))
            })?;
        info.roles = resource.roles_with_execute();
        info.user_ids = resource.users_with_execute();

        if let Some(timezone) = self
            .devices
            .device_timezone(&info.device_id)
            .await
            .map_err(|err| Error::unavailable(format!("{err}, device: {}", info.device_id)))?
        {
            info.timezone = timezone;
        }
        Ok(info)
    }

    /// Union every owning user's realm-role mappings into the role set.
    pub async fn merge_realm_roles(&self, info: &mut TableInfo) -> Result<(), Error> {
        for user_id in info.user_ids.clone() {
            let mappings = self
                .identity
                .realm_role_mappings(&user_id)
                .await
                .map_err(|err| Error::unavailable(format!("{err}, user: {user_id}")))?;
            for mapping in mappings {
                if !info.roles.contains(&mapping.name) {
                    info.roles.push(mapping.name);
                }
            }
        }
        Ok(())
    }
}

fn expand_id(short: &str) -> Result<String, Error> {
    short_id::expand(short).map_err(|err| Error::internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{
        MockDeviceRegistry, MockIdentityClient, MockPermissionsClient, PermissionFlags,
        ResourcePermissions, RoleMapping,
    };
    use crate::domain::ErrorCode;
    use rstest::rstest;

    const SHORT_USER: &str = "7IUxe2sUT32dRXAZhzXczw";
    const LONG_USER: &str = "ec85317b-6b14-4f7d-9d45-70198735dccf";
    const SHORT_OTHER: &str = "F_gsbPBvSb6xEz8lAWpguw";

    fn classifier_with(
        permissions: MockPermissionsClient,
        identity: MockIdentityClient,
        devices: MockDeviceRegistry,
    ) -> TableClassifier {
        TableClassifier::new(
            Arc::new(permissions),
            Arc::new(identity),
            Arc::new(devices),
            "urn:device:",
            "urn:service:",
            "UTC",
        )
    }

    fn strict_mocks() -> (MockPermissionsClient, MockIdentityClient, MockDeviceRegistry) {
        (
            MockPermissionsClient::new(),
            MockIdentityClient::new(),
            MockDeviceRegistry::new(),
        )
    }

    #[tokio::test]
    async fn export_tables_resolve_the_owning_user() {
        let (permissions, identity, devices) = strict_mocks();
        let classifier = classifier_with(permissions, identity, devices);

        let table = format!("userid:{SHORT_USER}_export:{SHORT_OTHER}");
        let info = classifier.classify(&table).await.expect("classify");

        assert_eq!(info.user_ids, vec![LONG_USER.to_string()]);
        assert_eq!(info.short_user_id, SHORT_USER);
        assert_eq!(info.short_export_id, SHORT_OTHER);
        assert_eq!(info.export_id, "17f82c6c-f06f-49be-b113-3f25016a60bb");
        assert!(info.roles.is_empty());
        assert_eq!(info.timezone, "UTC");
    }

    #[tokio::test]
    async fn device_tables_fetch_owners_and_timezone() {
        let (mut permissions, identity, mut devices) = strict_mocks();
        permissions
            .expect_resource()
            .withf(|kind, id| {
                kind == "devices" && id == format!("urn:device:{LONG_USER}").as_str()
            })
            .returning(|_, _| {
                let mut resource = ResourcePermissions::default();
                resource.role_permissions.insert(
                    "admin".into(),
                    PermissionFlags {
                        execute: true,
                        ..PermissionFlags::default()
                    },
                );
                resource.user_permissions.insert(
                    "owner-1".into(),
                    PermissionFlags {
                        execute: true,
                        ..PermissionFlags::default()
                    },
                );
                resource
                    .user_permissions
                    .insert("viewer".into(), PermissionFlags::default());
                Ok(resource)
            });
        devices
            .expect_device_timezone()
            .returning(|_| Ok(Some("Europe/Berlin".to_string())));
        let classifier = classifier_with(permissions, identity, devices);

        let table = format!("device:{SHORT_USER}_service:{SHORT_OTHER}_ld");
        let info = classifier.classify(&table).await.expect("classify");

        assert_eq!(info.roles, vec!["admin".to_string()]);
        assert_eq!(info.user_ids, vec!["owner-1".to_string()]);
        assert!(info.service_id.starts_with("urn:service:"));
        assert_eq!(info.timezone, "Europe/Berlin");
    }

    #[tokio::test]
    async fn device_without_timezone_attribute_keeps_default() {
        let (mut permissions, identity, mut devices) = strict_mocks();
        permissions
            .expect_resource()
            .returning(|_, _| Ok(ResourcePermissions::default()));
        devices.expect_device_timezone().returning(|_| Ok(None));
        let classifier = classifier_with(permissions, identity, devices);

        let table = format!("device:{SHORT_USER}_service:{SHORT_OTHER}");
        let info = classifier.classify(&table).await.expect("classify");
        assert_eq!(info.timezone, "UTC");
    }

    #[rstest]
    #[case("plain_table")]
    #[case("device:tooshort_service:alsoshort")]
    #[case("userid:7IUxe2sUT32dRXAZhzXcz_export:nope")]
    #[tokio::test]
    async fn unknown_formats_are_rejected(#[case] table: &str) {
        let (permissions, identity, devices) = strict_mocks();
        let classifier = classifier_with(permissions, identity, devices);
        let err = classifier.classify(table).await.expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn realm_roles_are_merged_without_duplicates() {
        let (permissions, mut identity, devices) = strict_mocks();
        identity.expect_realm_role_mappings().returning(|user_id| {
            Ok(vec![
                RoleMapping {
                    id: format!("{user_id}-1"),
                    name: "admin".into(),
                },
                RoleMapping {
                    id: format!("{user_id}-2"),
                    name: "analyst".into(),
                },
            ])
        });
        let classifier = classifier_with(permissions, identity, devices);

        let mut info = TableInfo {
            user_ids: vec!["u1".into(), "u2".into()],
            roles: vec!["admin".into()],
            ..TableInfo::default()
        };
        classifier.merge_realm_roles(&mut info).await.expect("merge");
        assert_eq!(info.roles, vec!["admin".to_string(), "analyst".to_string()]);
    }
}
