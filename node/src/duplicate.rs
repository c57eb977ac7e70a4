use corral_registry::{ClientRecord, Registry, CLIENT_KEY_PREFIX};
use tracing::debug;

use crate::error::JoinError;

/// Outcome of scanning the registry for an existing registration of this
/// node's address.
#[derive(Debug)]
pub enum DuplicateCheck {
    Clear,
    Conflict(ClientRecord),
}

/// Scan all client records and report a conflict if any non-deleted record
/// claims `node_ip_address`. Two live registrations under one address would
/// corrupt address-keyed data elsewhere in the cluster. A record that fails
/// to decode means the registry is corrupt and aborts the check.
pub async fn check_no_existing_clients<R: Registry>(
    registry: &R,
    node_ip_address: &str,
) -> Result<DuplicateCheck, JoinError> {
    let records = registry.scan_prefix(CLIENT_KEY_PREFIX).await?;
    debug!("scanned {} client record(s)", records.len());

    for (key, fields) in &records {
        let record = ClientRecord::from_hash(key, fields)?;
        if record.deleted {
            continue;
        }
        if record.node_ip_address == node_ip_address {
            return Ok(DuplicateCheck::Conflict(record));
        }
    }
    Ok(DuplicateCheck::Clear)
}
