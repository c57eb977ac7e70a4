use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{Connector, Registry};
use crate::error::RegistryError;
use crate::record::{ClientRecord, CLIENT_KEY_PREFIX};

#[derive(Debug, Default)]
struct Inner {
    // BTreeMap keeps scan order deterministic.
    hashes: BTreeMap<String, HashMap<String, String>>,
    version: Option<String>,
}

/// In-process registry with the same contract as the redis backend. Used by
/// unit tests and single-process experiments; shares state across clones.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a client record under its conventional `CL:` key.
    pub fn insert_client(&self, record: &ClientRecord) {
        let key = format!("{}{}", CLIENT_KEY_PREFIX, record.client_id);
        let fields = record.to_fields().into_iter().collect();
        self.inner.lock().unwrap().hashes.insert(key, fields);
    }

    /// Store raw hash fields, bypassing record encoding. Lets tests set up
    /// malformed records.
    pub fn insert_raw(&self, key: &str, fields: &[(&str, &str)]) {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner
            .lock()
            .unwrap()
            .hashes
            .insert(key.to_string(), fields);
    }

    pub fn set_version(&self, version: &str) {
        self.inner.lock().unwrap().version = Some(version.to_string());
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn scan_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, fields)| (key.clone(), fields.clone()))
            .collect())
    }

    async fn read_version(&self) -> Result<Option<String>, RegistryError> {
        Ok(self.inner.lock().unwrap().version.clone())
    }

    async fn write_version(&self, version: &str) -> Result<(), RegistryError> {
        self.inner.lock().unwrap().version = Some(version.to_string());
        Ok(())
    }

    async fn put_record(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }
}

/// Connector over a shared [`MemoryRegistry`]. Can be told to refuse the
/// first N connection attempts, and counts every attempt, so readiness-wait
/// behavior is observable from tests.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    registry: MemoryRegistry,
    refuse: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(registry: MemoryRegistry) -> Self {
        Self {
            registry,
            refuse: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Refuse the next `n` connection attempts with `Unreachable`.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryRegistry;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        _password: Option<&str>,
    ) -> Result<Self::Handle, RegistryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.refuse.load(Ordering::SeqCst);
        if remaining > 0 {
            self.refuse.store(remaining - 1, Ordering::SeqCst);
            return Err(RegistryError::Unreachable {
                addr: format!("{}:{}", host, port),
            });
        }
        Ok(self.registry.clone())
    }
}
