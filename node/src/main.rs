mod bootstrap;
mod config;
mod duplicate;
mod error;
mod join;
mod net;
mod resources;
mod stop;
mod types;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corral_registry::RedisConnector;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bootstrap::ProcessBootstrap;
use config::Config;
use join::JoinCoordinator;
use types::JoinInputs;

const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(about = "Corral cluster node launcher", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file path (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start this node and originate or join a cluster
    Start(StartArgs),
    /// Stop the cluster services launched on this machine
    Stop,
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    /// Provide this argument for the head node
    #[arg(long)]
    head: bool,

    /// The IP address of this node
    #[arg(long)]
    node_ip_address: Option<String>,

    /// The address for connecting to an existing registry, as host:port
    #[arg(long)]
    registry_address: Option<String>,

    /// The port to use for starting the registry (head only)
    #[arg(long)]
    registry_port: Option<u16>,

    /// Comma-separated ports for the additional registry shards (head only)
    #[arg(long)]
    registry_shard_ports: Option<String>,

    /// The number of additional registry shards (head only)
    #[arg(long)]
    num_registry_shards: Option<usize>,

    /// Configure the registry with this maximum number of clients (head only)
    #[arg(long)]
    registry_max_clients: Option<u64>,

    /// Secure the registry with this password
    #[arg(long)]
    registry_password: Option<String>,

    /// The number of CPUs on this node
    #[arg(long)]
    num_cpus: Option<u64>,

    /// The number of GPUs on this node
    #[arg(long)]
    num_gpus: Option<u64>,

    /// A JSON map of additional resource names to quantities
    #[arg(long, default_value = "{}")]
    resources: String,

    /// Do not start the cluster UI (head only)
    #[arg(long)]
    no_ui: bool,

    /// The maximum amount of memory (in bytes) for the object store
    #[arg(long)]
    object_store_memory: Option<u64>,

    /// The initial number of workers to start on this node
    #[arg(long)]
    num_initial_workers: Option<usize>,

    /// Seconds to keep waiting for the registry to become reachable
    #[arg(long)]
    registry_wait_timeout: Option<u64>,

    /// Block forever after a successful start
    #[arg(long)]
    block: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Start(args) => run_start(args, config).await,
        Command::Stop => run_stop(),
    }
}

async fn run_start(args: StartArgs, config: Config) -> Result<()> {
    let resources = resources::parse_resource_map(&args.resources)?;

    let wait_budget = Duration::from_secs(
        args.registry_wait_timeout
            .or(config.registry_wait_timeout_secs)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS),
    );

    let head = args.head;
    let inputs = JoinInputs {
        head,
        node_ip_address: args.node_ip_address,
        registry_address: args.registry_address,
        registry_password: args.registry_password.or(config.registry_password),
        resources,
        num_cpus: args.num_cpus,
        num_gpus: args.num_gpus,
        registry_port: args.registry_port.or(config.registry_port),
        shard_ports: args.registry_shard_ports,
        shard_count: args.num_registry_shards,
        max_clients: args.registry_max_clients,
        no_ui: args.no_ui,
        object_store_memory: args.object_store_memory,
        initial_workers: args.num_initial_workers,
    };

    // Ctrl-C aborts the registry wait instead of hanging the join attempt.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let coordinator = JoinCoordinator::new(
        RedisConnector,
        ProcessBootstrap::new(wait_budget),
        wait_budget,
        cancel,
    );

    let address_info = coordinator.execute(inputs).await?;
    info!(
        "started the local node services:\n{}",
        serde_json::to_string_pretty(&address_info).context("address info serializes")?
    );

    if head {
        info!(
            "Started the head node. Add nodes to this cluster by running\n\n    \
             corral start --registry-address {}\n\non the node you wish to add. \
             Run `corral stop` to terminate the services.",
            address_info.registry_address
        );
    } else {
        info!("Started the node. Run `corral stop` on this machine to terminate the services.");
    }

    if args.block {
        info!("--block given; idling until interrupted");
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    Ok(())
}

fn run_stop() -> Result<()> {
    let stopped = stop::stop_local_services();
    if stopped == 0 {
        info!("no running cluster services found");
    } else {
        info!("signalled {} process(es)", stopped);
    }
    Ok(())
}
