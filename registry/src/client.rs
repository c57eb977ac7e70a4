use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use crate::error::RegistryError;
use crate::record::VERSION_KEY;

/// Read/write surface of the coordination registry.
///
/// The join protocol only reads; the write operations exist for the
/// bootstrap step, which publishes the version record and this node's
/// client record once the local services are up.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Enumerate all keys starting with `prefix` together with their hash
    /// fields. Reads are snapshots; no atomicity across keys is implied.
    async fn scan_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>, RegistryError>;

    /// Version string the cluster was started with, if one was recorded.
    async fn read_version(&self) -> Result<Option<String>, RegistryError>;

    async fn write_version(&self, version: &str) -> Result<(), RegistryError>;

    async fn put_record(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), RegistryError>;
}

/// Produces connected registry handles. A fresh handle is made for every
/// join attempt and dropped when the attempt ends.
#[async_trait]
pub trait Connector: Send + Sync {
    type Handle: Registry + Send + Sync;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Self::Handle, RegistryError>;
}

/// Registry handle backed by a redis server.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: MultiplexedConnection,
    addr: String,
}

impl RedisRegistry {
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let addr = format!("{}:{}", host, port);
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password: password.map(str::to_string),
                ..Default::default()
            },
        };

        let client = redis::Client::open(info)
            .map_err(|e| classify_connect_error(&addr, e))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| classify_connect_error(&addr, e))?;

        // A PING round-trip proves the server is actually serving, not just
        // accepting TCP connections.
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| classify_connect_error(&addr, e))?;

        debug!("connected to registry at {}", addr);
        Ok(Self { conn, addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn scan_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>, RegistryError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}*", prefix))
            .await
            .map_err(RegistryError::Backend)?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(RegistryError::Backend)?;
            records.push((key, fields));
        }
        Ok(records)
    }

    async fn read_version(&self) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn.clone();
        conn.get(VERSION_KEY).await.map_err(RegistryError::Backend)
    }

    async fn write_version(&self, version: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        conn.set(VERSION_KEY, version)
            .await
            .map_err(RegistryError::Backend)
    }

    async fn put_record(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, fields)
            .await
            .map_err(RegistryError::Backend)
    }
}

/// Stateless connector for redis-backed registries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    type Handle = RedisRegistry;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Self::Handle, RegistryError> {
        RedisRegistry::connect(host, port, password).await
    }
}

fn classify_connect_error(addr: &str, err: redis::RedisError) -> RegistryError {
    if err.kind() == redis::ErrorKind::AuthenticationFailed {
        return RegistryError::AuthFailed;
    }
    if err.is_connection_refusal() || err.is_timeout() || err.is_io_error() {
        return RegistryError::Unreachable {
            addr: addr.to_string(),
        };
    }
    RegistryError::Backend(err)
}
