//! Client library for the cluster coordination registry.
//!
//! The registry is a shared key-value store with hash-field records and
//! prefix key enumeration. The head node starts one when it originates a
//! cluster; every joining node reads it to find out whether the cluster is
//! reachable, version-compatible, and not already occupied by a live
//! registration for its address.

mod client;
mod error;
mod memory;
mod record;
mod wait;

pub use client::{Connector, RedisConnector, RedisRegistry, Registry};
pub use error::RegistryError;
pub use memory::{MemoryConnector, MemoryRegistry};
pub use record::{ClientRecord, CLIENT_KEY_PREFIX, VERSION_KEY};
pub use wait::wait_ready;
