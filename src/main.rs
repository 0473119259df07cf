//! `nrmd` — node-local resource manager daemon entry point.
//!
//! Ambient plumbing only (§1, §10.4 of `SPEC_FULL.md`): parses socket
//! overrides, initializes tracing, builds the external-collaborator
//! reference drivers (`SubprocessContainerRuntime`, `StaticTopologyProvider`,
//! `MockSensorDriver`), and hands off to `nrm_core::daemon::Daemon`. No
//! control-plane logic lives here.

use clap::Parser;
use nrm_core::controller::NodePowerController;
use nrm_core::daemon::state::DaemonState;
use nrm_core::daemon::Daemon;
use nrm_core::registry::application::ApplicationRegistry;
use nrm_core::registry::ContainerRegistry;
use nrm_core::resources::ResourceManager;
use nrm_core::runtime::SubprocessContainerRuntime;
use nrm_core::sensor::{MockSensorDriver, SensorManager};
use nrm_core::topology::{StaticTopologyProvider, TopologyProvider};
use nrm_core::Config;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "nrmd", about = "Node-local resource manager daemon")]
struct Cli {
    /// Upstream RPC listen address (ROUTER/DEALER-equivalent, request/reply).
    #[arg(long, env = "NRMD_RPC_ADDR")]
    rpc_addr: Option<String>,

    /// Upstream publish listen address (PUB/SUB-equivalent broadcast).
    #[arg(long, env = "NRMD_PUB_ADDR")]
    pub_addr: Option<String>,

    /// Downstream event Unix-domain socket path.
    #[arg(long, env = "NRMD_EVENT_SOCKET")]
    event_socket: Option<String>,

    /// Log format: "text" (default) or "json".
    #[arg(long, env = "NRMD_LOG_FORMAT")]
    log_format: Option<String>,
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(rpc_addr) = cli.rpc_addr {
        config.sockets.rpc_addr = rpc_addr;
    }
    if let Some(pub_addr) = cli.pub_addr {
        config.sockets.pub_addr = pub_addr;
    }
    if let Some(event_socket) = cli.event_socket {
        config.sockets.event_socket_path = event_socket;
    }
    if let Some(log_format) = cli.log_format {
        config.observability.json_logs = log_format.eq_ignore_ascii_case("json");
    }

    nrm_core::observability::init_tracing(
        &config.observability.log_level,
        config.observability.json_logs,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async_main(config))?;

    Ok(())
}

async fn async_main(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let topology = Arc::new(StaticTopologyProvider::discover());
    let info = topology.info().await?;

    tracing::info!(cpus = info.cpus.len(), mems = info.mems.len(), "topology discovered");

    let resources = ResourceManager::new(info.cpus.clone(), info.mems.clone());
    let container_runtime = Arc::new(SubprocessContainerRuntime::new(info.clone()));

    let containers = ContainerRegistry::new(
        resources,
        container_runtime,
        topology,
        config.policy.damper_secs,
        config.policy.slowdown,
    );
    let applications = ApplicationRegistry::new();

    let sensor_driver = Box::new(MockSensorDriver::new(info.cpus.iter().copied().take(2).collect()));
    let sensors = SensorManager::new(sensor_driver);

    let controller = NodePowerController::new(
        config.policy.control_period.as_secs_f64(),
        0.0,
        config.policy.rapl_domains.clone(),
    );

    let state = DaemonState::new(containers, applications, sensors, controller, 0.0);
    let daemon = Daemon::new(state);

    daemon.run(&config).await?;

    tracing::info!("daemon core stopped cleanly");
    Ok(())
}
