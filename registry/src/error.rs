use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry refused or dropped the connection on one attempt.
    #[error("registry at {addr} is unreachable")]
    Unreachable { addr: String },

    #[error("registry rejected the supplied password")]
    AuthFailed,

    /// The readiness wait exhausted its budget without ever connecting.
    #[error("timed out after {0:?} waiting for the registry to become reachable")]
    Timeout(Duration),

    #[error("wait for the registry was cancelled")]
    Cancelled,

    /// A record under the client prefix lacks a required hash field.
    #[error("registry record {key:?} is missing required field {field:?}")]
    MissingField { key: String, field: &'static str },

    #[error("registry record {key:?} field {field:?} has invalid value {value:?}")]
    InvalidField {
        key: String,
        field: &'static str,
        value: String,
    },

    #[error("registry command failed")]
    Backend(#[source] redis::RedisError),
}
