use corral_registry::RegistryError;
use thiserror::Error;

/// Fatal failures of one join attempt. None of these leave the registry in
/// a newly-mutated state; writes only happen inside the bootstrap step.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("the resource map may not define {name:?}; pass --{flag} instead")]
    ReservedResource { name: String, flag: &'static str },

    #[error(
        "unable to parse the --resources argument as a JSON object; \
         try a format like --resources='{{\"CustomResource1\": 3, \"CustomResource2\": 2}}'"
    )]
    InvalidResources(#[source] serde_json::Error),

    #[error("conflicting arguments: {0}")]
    ArgumentConflict(&'static str),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("malformed registry address {0:?}: expected exactly host:port")]
    MalformedAddress(String),

    #[error("invalid --registry-shard-ports value {0:?}: expected comma-separated ports like 6380,6381")]
    InvalidShardPorts(String),

    #[error("the cluster was started with version {cluster} but this node runs {local}")]
    VersionMismatch { cluster: String, local: String },

    #[error(
        "the registry already has a live client with IP address {ip} (client id {client_id}); \
         is a node from this machine still registered?"
    )]
    DuplicateNode { ip: String, client_id: String },

    #[error("could not determine this node's IP address: {0}")]
    AddressLookup(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("node bootstrap failed: {0:#}")]
    Bootstrap(anyhow::Error),
}
