use std::collections::HashMap;

use crate::error::RegistryError;

/// Key prefix for client records. One record exists per past or present
/// cluster participant; records are flagged deleted, never removed.
pub const CLIENT_KEY_PREFIX: &str = "CL:";

/// Key holding the version string the cluster was started with.
pub const VERSION_KEY: &str = "VERSION_INFO";

const FIELD_CLIENT_ID: &str = "client_id";
const FIELD_NODE_IP_ADDRESS: &str = "node_ip_address";
const FIELD_CLIENT_TYPE: &str = "client_type";
const FIELD_DELETED: &str = "deleted";

/// Snapshot of one participant record read from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: String,
    pub node_ip_address: String,
    pub client_type: String,
    pub deleted: bool,
}

impl ClientRecord {
    /// Decode a record from its hash fields. Every required field must be
    /// present and `deleted` must be exactly `"0"` or `"1"`; anything else
    /// means the registry is corrupt.
    pub fn from_hash(key: &str, fields: &HashMap<String, String>) -> Result<Self, RegistryError> {
        let get = |field: &'static str| {
            fields
                .get(field)
                .cloned()
                .ok_or_else(|| RegistryError::MissingField {
                    key: key.to_string(),
                    field,
                })
        };

        let deleted_raw = get(FIELD_DELETED)?;
        let deleted = match deleted_raw.as_str() {
            "0" => false,
            "1" => true,
            _ => {
                return Err(RegistryError::InvalidField {
                    key: key.to_string(),
                    field: FIELD_DELETED,
                    value: deleted_raw,
                })
            }
        };

        Ok(Self {
            client_id: get(FIELD_CLIENT_ID)?,
            node_ip_address: get(FIELD_NODE_IP_ADDRESS)?,
            client_type: get(FIELD_CLIENT_TYPE)?,
            deleted,
        })
    }

    /// Hash fields for a fresh (live) record, as written at bootstrap.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_CLIENT_ID.into(), self.client_id.clone()),
            (FIELD_NODE_IP_ADDRESS.into(), self.node_ip_address.clone()),
            (FIELD_CLIENT_TYPE.into(), self.client_type.clone()),
            (
                FIELD_DELETED.into(),
                if self.deleted { "1" } else { "0" }.into(),
            ),
        ]
    }
}
