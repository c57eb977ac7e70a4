use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use corral_registry::{
    wait_ready, ClientRecord, RedisConnector, RedisRegistry, Registry, CLIENT_KEY_PREFIX,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::join::NODE_VERSION;
use crate::types::{AddressInfo, HeadPlan, JoinRequest, RolePlan, WorkerPlan};

/// Executable names of the local cluster services. `corral stop` matches
/// running processes against these.
pub const REGISTRY_PROGRAM: &str = "redis-server";
pub const STORE_PROGRAM: &str = "corral-store";
pub const WORKER_PROGRAM: &str = "corral-workerd";
pub const UI_PROGRAM: &str = "corral-ui";

/// Starts the local services for a validated join request and reports their
/// endpoints. Opaque to the coordinator; failures are propagated verbatim.
#[async_trait]
pub trait NodeBootstrap: Send + Sync {
    async fn start(&self, request: &JoinRequest, node_ip_address: &str) -> Result<AddressInfo>;
}

/// The shipped bootstrap: launches the registry server (head only), the
/// object store daemon, and the worker daemon as external processes, then
/// publishes this node's client record.
pub struct ProcessBootstrap {
    registry_wait_budget: Duration,
    socket_dir: PathBuf,
}

impl ProcessBootstrap {
    pub fn new(registry_wait_budget: Duration) -> Self {
        Self {
            registry_wait_budget,
            socket_dir: std::env::temp_dir().join("corral"),
        }
    }

    async fn start_head(
        &self,
        request: &JoinRequest,
        plan: &HeadPlan,
        node_ip: &str,
    ) -> Result<AddressInfo> {
        let password = request.registry_password.as_deref();
        spawn_registry_server(plan.registry_port, password, plan.max_clients)?;

        let shard_ports = match &plan.shard_ports {
            Some(ports) => ports.clone(),
            None => derive_shard_ports(plan.registry_port, plan.shard_count)?,
        };
        for port in &shard_ports {
            spawn_registry_server(*port, password, None)?;
        }

        // The coordinator never waited for this registry (we just created
        // it), so the readiness wait happens here.
        let registry = wait_ready(
            &RedisConnector,
            "127.0.0.1",
            plan.registry_port,
            password,
            self.registry_wait_budget,
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .context("registry server did not come up")?;

        registry
            .write_version(NODE_VERSION)
            .await
            .context("failed to record the cluster version")?;

        let registry_address = format!("{}:{}", node_ip, plan.registry_port);
        let info = self
            .start_local_daemons(request, node_ip, &registry_address, "head", &registry)
            .await?;

        if plan.include_ui {
            spawn_daemon(
                UI_PROGRAM,
                &[
                    "--registry-address".into(),
                    registry_address.clone(),
                    "--port".into(),
                    "8080".into(),
                ],
            )?;
            return Ok(AddressInfo {
                webui_url: Some(format!("http://{}:8080", node_ip)),
                ..info
            });
        }
        Ok(info)
    }

    async fn start_worker(
        &self,
        request: &JoinRequest,
        plan: &WorkerPlan,
        node_ip: &str,
    ) -> Result<AddressInfo> {
        // The coordinator already proved this registry reachable.
        let registry = RedisRegistry::connect(
            &plan.registry_host,
            plan.registry_port,
            request.registry_password.as_deref(),
        )
        .await
        .context("failed to reconnect to the registry")?;

        let registry_address = format!("{}:{}", plan.registry_host, plan.registry_port);
        self.start_local_daemons(request, node_ip, &registry_address, "worker", &registry)
            .await
    }

    async fn start_local_daemons<R: Registry>(
        &self,
        request: &JoinRequest,
        node_ip: &str,
        registry_address: &str,
        client_type: &str,
        registry: &R,
    ) -> Result<AddressInfo> {
        std::fs::create_dir_all(&self.socket_dir)
            .with_context(|| format!("failed to create {:?}", self.socket_dir))?;
        let pid = std::process::id();
        let store_socket = self.socket_dir.join(format!("store-{}.sock", pid));
        let worker_socket = self.socket_dir.join(format!("workerd-{}.sock", pid));

        let mut store_args = vec![
            "--socket".to_string(),
            store_socket.display().to_string(),
        ];
        if let Some(bytes) = request.object_store_memory {
            store_args.push("--memory".into());
            store_args.push(bytes.to_string());
        }
        spawn_daemon(STORE_PROGRAM, &store_args)?;

        // CPU count is auto-detected when the caller left it unset.
        let mut resources = request.resources.clone();
        resources
            .entry("CPU".to_string())
            .or_insert_with(|| num_cpus::get() as u64);

        let mut worker_args = vec![
            "--registry-address".to_string(),
            registry_address.to_string(),
            "--node-ip-address".to_string(),
            node_ip.to_string(),
            "--store-socket".to_string(),
            store_socket.display().to_string(),
            "--socket".to_string(),
            worker_socket.display().to_string(),
            "--resources".to_string(),
            serde_json::to_string(&resources).context("failed to encode the resource map")?,
        ];
        if let Some(n) = request.initial_workers {
            worker_args.push("--num-workers".into());
            worker_args.push(n.to_string());
        }
        spawn_daemon(WORKER_PROGRAM, &worker_args)?;

        let client_id = Uuid::new_v4().to_string();
        let record = ClientRecord {
            client_id: client_id.clone(),
            node_ip_address: node_ip.to_string(),
            client_type: client_type.to_string(),
            deleted: false,
        };
        registry
            .put_record(
                &format!("{}{}", CLIENT_KEY_PREFIX, client_id),
                &record.to_fields(),
            )
            .await
            .context("failed to publish this node's client record")?;
        info!("registered client {} at {}", client_id, node_ip);

        Ok(AddressInfo {
            registry_address: registry_address.to_string(),
            object_store_socket: store_socket.display().to_string(),
            node_manager_socket: worker_socket.display().to_string(),
            webui_url: None,
        })
    }
}

#[async_trait]
impl NodeBootstrap for ProcessBootstrap {
    async fn start(&self, request: &JoinRequest, node_ip_address: &str) -> Result<AddressInfo> {
        match &request.role {
            RolePlan::Head(plan) => self.start_head(request, plan, node_ip_address).await,
            RolePlan::Worker(plan) => self.start_worker(request, plan, node_ip_address).await,
        }
    }
}

fn spawn_registry_server(
    port: u16,
    password: Option<&str>,
    max_clients: Option<u64>,
) -> Result<()> {
    let mut args = vec![
        "--port".to_string(),
        port.to_string(),
        "--protected-mode".to_string(),
        "no".to_string(),
        "--save".to_string(),
        String::new(),
    ];
    if let Some(pw) = password {
        args.push("--requirepass".into());
        args.push(pw.to_string());
    }
    if let Some(n) = max_clients {
        args.push("--maxclients".into());
        args.push(n.to_string());
    }
    spawn_daemon(REGISTRY_PROGRAM, &args)
}

fn spawn_daemon(program: &str, args: &[String]) -> Result<()> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;
    info!("launched {} (pid {})", program, child.id());
    Ok(())
}

/// Shard ports default to the ports directly above the primary.
fn derive_shard_ports(primary: u16, count: usize) -> Result<Vec<u16>> {
    (1..=count)
        .map(|i| {
            u16::try_from(i)
                .ok()
                .and_then(|i| primary.checked_add(i))
                .context("registry shard port out of range")
        })
        .collect()
}
