use std::time::Duration;

use corral_registry::{wait_ready, Connector, Registry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::NodeBootstrap;
use crate::duplicate::{check_no_existing_clients, DuplicateCheck};
use crate::error::JoinError;
use crate::net;
use crate::resources::build_resource_spec;
use crate::types::{AddressInfo, HeadPlan, JoinInputs, JoinRequest, RolePlan, WorkerPlan};

/// Version this node was built with; the cluster must run the same one.
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REGISTRY_PORT: u16 = 6379;

/// Validate the raw start inputs into a join request. Pure: all failures
/// here happen before any network I/O.
pub fn plan(inputs: JoinInputs) -> Result<JoinRequest, JoinError> {
    let resources = build_resource_spec(inputs.resources.clone(), inputs.num_cpus, inputs.num_gpus)?;
    let role = if inputs.head {
        validate_head(&inputs)?
    } else {
        validate_worker(&inputs)?
    };

    Ok(JoinRequest {
        role,
        node_ip_address: inputs.node_ip_address,
        registry_password: inputs.registry_password,
        resources,
        object_store_memory: inputs.object_store_memory,
        initial_workers: inputs.initial_workers,
    })
}

fn validate_head(inputs: &JoinInputs) -> Result<RolePlan, JoinError> {
    if inputs.registry_address.is_some() {
        return Err(JoinError::ArgumentConflict(
            "--registry-address cannot be given with --head; the head node starts the registry itself",
        ));
    }

    let shard_ports = inputs
        .shard_ports
        .as_deref()
        .map(parse_shard_ports)
        .transpose()?;

    let shard_count = match (&shard_ports, inputs.shard_count) {
        // Infer the shard count from the port list when not given.
        (Some(ports), None) => ports.len(),
        (Some(ports), Some(count)) => {
            if ports.len() != count {
                return Err(JoinError::ArgumentConflict(
                    "the number of ports in --registry-shard-ports must equal --num-registry-shards",
                ));
            }
            count
        }
        (None, Some(count)) => count,
        (None, None) => 1,
    };

    Ok(RolePlan::Head(HeadPlan {
        registry_port: inputs.registry_port.unwrap_or(DEFAULT_REGISTRY_PORT),
        shard_ports,
        shard_count,
        max_clients: inputs.max_clients,
        include_ui: !inputs.no_ui,
    }))
}

fn validate_worker(inputs: &JoinInputs) -> Result<RolePlan, JoinError> {
    if inputs.registry_port.is_some() {
        return Err(JoinError::ArgumentConflict(
            "--registry-port is only meaningful with --head",
        ));
    }
    if inputs.shard_ports.is_some() {
        return Err(JoinError::ArgumentConflict(
            "--registry-shard-ports is only meaningful with --head",
        ));
    }
    if inputs.shard_count.is_some() {
        return Err(JoinError::ArgumentConflict(
            "--num-registry-shards is only meaningful with --head",
        ));
    }
    if inputs.max_clients.is_some() {
        return Err(JoinError::ArgumentConflict(
            "--registry-max-clients is only meaningful with --head",
        ));
    }
    if inputs.no_ui {
        return Err(JoinError::ArgumentConflict(
            "--no-ui is only meaningful with --head",
        ));
    }

    let address = inputs
        .registry_address
        .as_deref()
        .ok_or(JoinError::MissingArgument(
            "--registry-address must be provided to join an existing cluster",
        ))?;
    let (registry_host, registry_port) = split_address(address)?;

    Ok(RolePlan::Worker(WorkerPlan {
        registry_host,
        registry_port,
    }))
}

/// Split a `host:port` registry address. Exactly one `:` is accepted.
pub fn split_address(address: &str) -> Result<(String, u16), JoinError> {
    let malformed = || JoinError::MalformedAddress(address.to_string());
    let parts: Vec<&str> = address.split(':').collect();
    match parts.as_slice() {
        [host, port] if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| malformed())?;
            Ok((host.to_string(), port))
        }
        _ => Err(malformed()),
    }
}

fn parse_shard_ports(raw: &str) -> Result<Vec<u16>, JoinError> {
    raw.split(',')
        .map(|p| p.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| JoinError::InvalidShardPorts(raw.to_string()))
}

/// Drives one join attempt: validation, then for workers the wait-ready →
/// version-check → duplicate-check pipeline, then the bootstrap hand-off.
/// The order of the worker checks is fixed; a stale or incompatible
/// registry must never produce a false duplicate diagnosis.
pub struct JoinCoordinator<C, B> {
    connector: C,
    bootstrap: B,
    wait_budget: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<C: Connector, B: NodeBootstrap> JoinCoordinator<C, B> {
    pub fn new(
        connector: C,
        bootstrap: B,
        wait_budget: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            bootstrap,
            wait_budget,
            poll_interval: Duration::from_secs(1),
            cancel,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn execute(&self, inputs: JoinInputs) -> Result<AddressInfo, JoinError> {
        let request = plan(inputs)?;
        match request.role.clone() {
            RolePlan::Head(_) => self.run_head(&request).await,
            RolePlan::Worker(plan) => self.run_worker(&request, &plan).await,
        }
    }

    async fn run_head(&self, request: &JoinRequest) -> Result<AddressInfo, JoinError> {
        let node_ip = net::node_ip_address(request.node_ip_address.as_deref(), None)?;
        info!("using IP address {} for this node", node_ip);

        self.bootstrap
            .start(request, &node_ip)
            .await
            .map_err(JoinError::Bootstrap)
    }

    async fn run_worker(
        &self,
        request: &JoinRequest,
        plan: &WorkerPlan,
    ) -> Result<AddressInfo, JoinError> {
        info!(
            "joining the cluster at {}:{}",
            plan.registry_host, plan.registry_port
        );
        let registry = wait_ready(
            &self.connector,
            &plan.registry_host,
            plan.registry_port,
            request.registry_password.as_deref(),
            self.wait_budget,
            self.poll_interval,
            &self.cancel,
        )
        .await?;

        check_version(&registry).await?;

        let node_ip = net::node_ip_address(
            request.node_ip_address.as_deref(),
            Some((plan.registry_host.as_str(), plan.registry_port)),
        )?;
        info!("using IP address {} for this node", node_ip);

        match check_no_existing_clients(&registry, &node_ip).await? {
            DuplicateCheck::Clear => {}
            DuplicateCheck::Conflict(existing) => {
                return Err(JoinError::DuplicateNode {
                    ip: node_ip,
                    client_id: existing.client_id,
                });
            }
        }

        self.bootstrap
            .start(request, &node_ip)
            .await
            .map_err(JoinError::Bootstrap)
    }
}

/// The cluster and the joining node must run identical versions; no partial
/// compatibility is attempted. A registry without a version record predates
/// version stamping and passes.
async fn check_version<R: Registry>(registry: &R) -> Result<(), JoinError> {
    match registry.read_version().await? {
        None => {
            debug!("registry carries no version record; skipping the version check");
            Ok(())
        }
        Some(cluster) if cluster == NODE_VERSION => Ok(()),
        Some(cluster) => Err(JoinError::VersionMismatch {
            cluster,
            local: NODE_VERSION.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use corral_registry::{ClientRecord, MemoryConnector, MemoryRegistry, RegistryError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(10);

    #[derive(Clone, Default)]
    struct StubBootstrap {
        starts: Arc<AtomicUsize>,
    }

    impl StubBootstrap {
        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NodeBootstrap for StubBootstrap {
        async fn start(
            &self,
            request: &JoinRequest,
            node_ip_address: &str,
        ) -> anyhow::Result<AddressInfo> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let registry_address = match &request.role {
                RolePlan::Head(h) => format!("{}:{}", node_ip_address, h.registry_port),
                RolePlan::Worker(w) => format!("{}:{}", w.registry_host, w.registry_port),
            };
            Ok(AddressInfo {
                registry_address,
                object_store_socket: "/tmp/corral/store.sock".into(),
                node_manager_socket: "/tmp/corral/workerd.sock".into(),
                webui_url: None,
            })
        }
    }

    struct FailingBootstrap;

    #[async_trait]
    impl NodeBootstrap for FailingBootstrap {
        async fn start(&self, _: &JoinRequest, _: &str) -> anyhow::Result<AddressInfo> {
            Err(anyhow!("object store refused to start"))
        }
    }

    fn coordinator(
        connector: MemoryConnector,
        bootstrap: StubBootstrap,
    ) -> JoinCoordinator<MemoryConnector, StubBootstrap> {
        JoinCoordinator::new(
            connector,
            bootstrap,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .with_poll_interval(POLL)
    }

    fn worker_inputs(addr: &str) -> JoinInputs {
        JoinInputs {
            registry_address: Some(addr.to_string()),
            node_ip_address: Some("10.0.0.5".to_string()),
            ..Default::default()
        }
    }

    fn live_record(ip: &str) -> ClientRecord {
        ClientRecord {
            client_id: "existing".into(),
            node_ip_address: ip.into(),
            client_type: "worker".into(),
            deleted: false,
        }
    }

    // -- validation ----------------------------------------------------------

    #[test]
    fn test_head_rejects_registry_address() {
        let inputs = JoinInputs {
            head: true,
            registry_address: Some("10.0.0.1:6379".into()),
            ..Default::default()
        };
        assert!(matches!(
            plan(inputs),
            Err(JoinError::ArgumentConflict(msg)) if msg.contains("--registry-address")
        ));
    }

    #[test]
    fn test_head_infers_shard_count_from_ports() {
        let inputs = JoinInputs {
            head: true,
            shard_ports: Some("6380,6381".into()),
            ..Default::default()
        };
        match plan(inputs).unwrap().role {
            RolePlan::Head(head) => {
                assert_eq!(head.shard_count, 2);
                assert_eq!(head.shard_ports, Some(vec![6380, 6381]));
            }
            other => panic!("unexpected role: {:?}", other),
        }
    }

    #[test]
    fn test_head_shard_count_must_match_ports() {
        let inputs = JoinInputs {
            head: true,
            shard_ports: Some("6380,6381".into()),
            shard_count: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            plan(inputs),
            Err(JoinError::ArgumentConflict(msg)) if msg.contains("--num-registry-shards")
        ));

        let agreeing = JoinInputs {
            head: true,
            shard_ports: Some("6380,6381".into()),
            shard_count: Some(2),
            ..Default::default()
        };
        assert!(plan(agreeing).is_ok());
    }

    #[test]
    fn test_head_defaults() {
        match plan(JoinInputs {
            head: true,
            ..Default::default()
        })
        .unwrap()
        .role
        {
            RolePlan::Head(head) => {
                assert_eq!(head.registry_port, DEFAULT_REGISTRY_PORT);
                assert_eq!(head.shard_count, 1);
                assert!(head.shard_ports.is_none());
                assert!(head.include_ui);
            }
            other => panic!("unexpected role: {:?}", other),
        }
    }

    #[test]
    fn test_head_rejects_unparseable_shard_ports() {
        let inputs = JoinInputs {
            head: true,
            shard_ports: Some("6380,banana".into()),
            ..Default::default()
        };
        assert!(matches!(plan(inputs), Err(JoinError::InvalidShardPorts(_))));
    }

    #[test]
    fn test_worker_requires_registry_address() {
        assert!(matches!(
            plan(JoinInputs::default()),
            Err(JoinError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_worker_rejects_each_head_only_option() {
        let cases: Vec<(JoinInputs, &str)> = vec![
            (
                JoinInputs {
                    registry_port: Some(7000),
                    ..worker_inputs("10.0.0.1:6379")
                },
                "--registry-port",
            ),
            (
                JoinInputs {
                    shard_ports: Some("6380".into()),
                    ..worker_inputs("10.0.0.1:6379")
                },
                "--registry-shard-ports",
            ),
            (
                JoinInputs {
                    shard_count: Some(2),
                    ..worker_inputs("10.0.0.1:6379")
                },
                "--num-registry-shards",
            ),
            (
                JoinInputs {
                    max_clients: Some(1000),
                    ..worker_inputs("10.0.0.1:6379")
                },
                "--registry-max-clients",
            ),
            (
                JoinInputs {
                    no_ui: true,
                    ..worker_inputs("10.0.0.1:6379")
                },
                "--no-ui",
            ),
        ];

        for (inputs, flag) in cases {
            match plan(inputs) {
                Err(JoinError::ArgumentConflict(msg)) => {
                    assert!(msg.contains(flag), "message {:?} should name {}", msg, flag)
                }
                other => panic!("{} should conflict, got {:?}", flag, other),
            }
        }
    }

    #[test]
    fn test_split_address() {
        assert_eq!(
            split_address("10.0.0.1:6379").unwrap(),
            ("10.0.0.1".to_string(), 6379)
        );
        assert_eq!(
            split_address("registry.internal:6379").unwrap(),
            ("registry.internal".to_string(), 6379)
        );
        for bad in ["10.0.0.1", "10.0.0.1:6379:extra", "10.0.0.1:port", ":6379"] {
            assert!(
                matches!(split_address(bad), Err(JoinError::MalformedAddress(_))),
                "{:?} should be malformed",
                bad
            );
        }
    }

    // -- coordinator ---------------------------------------------------------

    #[tokio::test]
    async fn test_validation_failure_precedes_any_registry_io() {
        let connector = MemoryConnector::new(MemoryRegistry::new());
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector.clone(), bootstrap.clone());

        let err = coord.execute(JoinInputs::default()).await.unwrap_err();
        assert!(matches!(err, JoinError::MissingArgument(_)));
        assert_eq!(connector.attempts(), 0);
        assert_eq!(bootstrap.starts(), 0);
    }

    #[tokio::test]
    async fn test_head_never_touches_the_connector() {
        let connector = MemoryConnector::new(MemoryRegistry::new());
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector.clone(), bootstrap.clone());

        let info = coord
            .execute(JoinInputs {
                head: true,
                node_ip_address: Some("10.0.0.1".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(info.registry_address, "10.0.0.1:6379");
        assert_eq!(connector.attempts(), 0);
        assert_eq!(bootstrap.starts(), 1);
    }

    #[tokio::test]
    async fn test_worker_success_path() {
        let registry = MemoryRegistry::new();
        registry.set_version(NODE_VERSION);
        let connector = MemoryConnector::new(registry);
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector.clone(), bootstrap.clone());

        let info = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap();
        assert_eq!(info.registry_address, "10.0.0.1:6379");
        assert_eq!(connector.attempts(), 1);
        assert_eq!(bootstrap.starts(), 1);
    }

    #[tokio::test]
    async fn test_worker_waits_through_registry_startup() {
        let registry = MemoryRegistry::new();
        registry.set_version(NODE_VERSION);
        let connector = MemoryConnector::new(registry);
        connector.refuse_next(3);
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector.clone(), bootstrap.clone());

        coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap();
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test]
    async fn test_worker_times_out_on_unreachable_registry() {
        let connector = MemoryConnector::new(MemoryRegistry::new());
        connector.refuse_next(usize::MAX);
        let bootstrap = StubBootstrap::default();
        let coord = JoinCoordinator::new(
            connector,
            bootstrap.clone(),
            Duration::from_millis(50),
            CancellationToken::new(),
        )
        .with_poll_interval(POLL);

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        assert!(matches!(
            err,
            JoinError::Registry(RegistryError::Timeout(_))
        ));
        assert_eq!(bootstrap.starts(), 0);
    }

    #[tokio::test]
    async fn test_worker_version_mismatch_is_fatal() {
        let registry = MemoryRegistry::new();
        registry.set_version("an older build");
        let connector = MemoryConnector::new(registry);
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector, bootstrap.clone());

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        assert!(matches!(err, JoinError::VersionMismatch { .. }));
        assert_eq!(bootstrap.starts(), 0);
    }

    #[tokio::test]
    async fn test_worker_accepts_registry_without_version_record() {
        let connector = MemoryConnector::new(MemoryRegistry::new());
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector, bootstrap.clone());

        coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap();
        assert_eq!(bootstrap.starts(), 1);
    }

    #[tokio::test]
    async fn test_worker_duplicate_address_is_fatal() {
        let registry = MemoryRegistry::new();
        registry.set_version(NODE_VERSION);
        registry.insert_client(&live_record("10.0.0.5"));
        let connector = MemoryConnector::new(registry);
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector, bootstrap.clone());

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        match err {
            JoinError::DuplicateNode { ip, client_id } => {
                assert_eq!(ip, "10.0.0.5");
                assert_eq!(client_id, "existing");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(bootstrap.starts(), 0);
    }

    #[tokio::test]
    async fn test_worker_ignores_deleted_registration() {
        let registry = MemoryRegistry::new();
        registry.set_version(NODE_VERSION);
        let mut gone = live_record("10.0.0.5");
        gone.deleted = true;
        registry.insert_client(&gone);
        let connector = MemoryConnector::new(registry);
        let bootstrap = StubBootstrap::default();
        let coord = coordinator(connector, bootstrap.clone());

        coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap();
        assert_eq!(bootstrap.starts(), 1);
    }

    #[tokio::test]
    async fn test_version_check_runs_before_duplicate_check() {
        // A registry that is both incompatible and seemingly occupied must
        // report the version problem, not a false duplicate.
        let registry = MemoryRegistry::new();
        registry.set_version("an older build");
        registry.insert_client(&live_record("10.0.0.5"));
        let connector = MemoryConnector::new(registry);
        let coord = coordinator(connector, StubBootstrap::default());

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        assert!(matches!(err, JoinError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_propagates() {
        let registry = MemoryRegistry::new();
        registry.set_version(NODE_VERSION);
        let connector = MemoryConnector::new(registry);
        let coord = JoinCoordinator::new(
            connector,
            FailingBootstrap,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .with_poll_interval(POLL);

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        match err {
            JoinError::Bootstrap(source) => {
                assert!(source.to_string().contains("object store"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_wait_surfaces_cancelled() {
        let connector = MemoryConnector::new(MemoryRegistry::new());
        connector.refuse_next(usize::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let coord = JoinCoordinator::new(
            connector,
            StubBootstrap::default(),
            Duration::from_secs(30),
            cancel,
        )
        .with_poll_interval(POLL);

        let err = coord.execute(worker_inputs("10.0.0.1:6379")).await.unwrap_err();
        assert!(matches!(
            err,
            JoinError::Registry(RegistryError::Cancelled)
        ));
    }
}
