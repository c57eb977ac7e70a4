use std::collections::BTreeMap;

use serde::Serialize;

/// Resource name to quantity. `CPU` and `GPU` enter only through the
/// dedicated numeric flags; an unset key means the bootstrap layer
/// auto-detects.
pub type ResourceSpec = BTreeMap<String, u64>;

/// Raw, role-agnostic start inputs as supplied by the caller. Validation
/// turns these into a [`JoinRequest`] or rejects them.
#[derive(Debug, Clone, Default)]
pub struct JoinInputs {
    pub head: bool,
    pub node_ip_address: Option<String>,
    pub registry_address: Option<String>,
    pub registry_password: Option<String>,
    pub resources: ResourceSpec,
    pub num_cpus: Option<u64>,
    pub num_gpus: Option<u64>,
    // Head-only options.
    pub registry_port: Option<u16>,
    pub shard_ports: Option<String>,
    pub shard_count: Option<usize>,
    pub max_clients: Option<u64>,
    pub no_ui: bool,
    // Passed through to the bootstrap layer.
    pub object_store_memory: Option<u64>,
    pub initial_workers: Option<usize>,
}

/// Role settled by validation. Head-only and worker-only options live in
/// the matching variant, so an invalid combination cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolePlan {
    Head(HeadPlan),
    Worker(WorkerPlan),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadPlan {
    pub registry_port: u16,
    pub shard_ports: Option<Vec<u16>>,
    pub shard_count: usize,
    pub max_clients: Option<u64>,
    pub include_ui: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    pub registry_host: String,
    pub registry_port: u16,
}

/// One fully validated join attempt. Owned by that attempt alone and never
/// mutated after validation.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub role: RolePlan,
    pub node_ip_address: Option<String>,
    pub registry_password: Option<String>,
    pub resources: ResourceSpec,
    pub object_store_memory: Option<u64>,
    pub initial_workers: Option<usize>,
}

/// Endpoint bundle produced by a successful bootstrap, surfaced to the
/// caller unmodified.
#[derive(Debug, Clone, Serialize)]
pub struct AddressInfo {
    pub registry_address: String,
    pub object_store_socket: String,
    pub node_manager_socket: String,
    pub webui_url: Option<String>,
}
