//! Decoded change-notification messages delivered by the bus consumer.

use serde::{Deserialize, Serialize};

/// Method carried by a table-update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableEditMethod {
    Put,
    Delete,
}

/// Upstream notification that physical tables were created or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEditMessage {
    pub method: TableEditMethod,
    #[serde(rename = "Tables", default)]
    pub tables: Vec<String>,
}

/// Upstream notification that resource permissions changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUpdateMessage {
    #[serde(default)]
    pub resource_kind: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_table_edit_message() {
        let msg: TableEditMessage =
            serde_json::from_str(r#"{"method":"put","Tables":["a","b"]}"#).expect("decode");
        assert_eq!(msg.method, TableEditMethod::Put);
        assert_eq!(msg.tables, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn decodes_delete_without_tables() {
        let msg: TableEditMessage =
            serde_json::from_str(r#"{"method":"delete"}"#).expect("decode");
        assert_eq!(msg.method, TableEditMethod::Delete);
        assert!(msg.tables.is_empty());
    }

    #[test]
    fn decodes_permission_update_message() {
        let msg: PermissionUpdateMessage = serde_json::from_str(
            r#"{"resource_kind":"devices","resource_id":"urn:device:1","handler":"search","command":"PUT"}"#,
        )
        .expect("decode");
        assert_eq!(msg.resource_kind, "devices");
        assert_eq!(msg.command, "PUT");
    }
}
