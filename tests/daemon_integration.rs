//! End-to-end daemon tests: bind the real sockets, speak the real wire
//! frames, drive a container through `run` → `process_exit` and check a
//! policy-less `setpower`/`getpower` round trip.

use nrm_core::controller::NodePowerController;
use nrm_core::daemon::state::DaemonState;
use nrm_core::daemon::Daemon;
use nrm_core::message::frame::{read_frame, write_frame};
use nrm_core::message::schema::{decode_rpc_reply, encode_rpc_request};
use nrm_core::message::types::{RpcReply, RpcRequest};
use nrm_core::registry::application::ApplicationRegistry;
use nrm_core::registry::ContainerRegistry;
use nrm_core::resources::ResourceManager;
use nrm_core::runtime::SubprocessContainerRuntime;
use nrm_core::sensor::{MockSensorDriver, SensorManager};
use nrm_core::topology::StaticTopologyProvider;
use nrm_core::types::{Config, ContainerId};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpStream;

/// A free local port, picked by binding to `:0` and dropping the listener.
/// Small race window between drop and rebind, acceptable for these tests.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.sockets.rpc_addr = format!("127.0.0.1:{}", free_port());
    config.sockets.pub_addr = format!("127.0.0.1:{}", free_port());
    // A fresh tempdir per test keeps the socket path unique without
    // leaving the file behind once the directory is dropped; `UnixListener`
    // only needs the path to not already exist as a non-socket file at
    // bind time, so it's fine that the tempdir (and its would-be socket
    // file) is never materialized here.
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.into_path().join("nrm-event.sock");
    config.sockets.event_socket_path = socket_path.to_string_lossy().into_owned();
    config
}

/// Build a daemon wired with the reference drivers (no real RAPL/hwloc
/// underneath), matching `main.rs`'s construction.
fn build_daemon() -> Daemon {
    let topology = Arc::new(StaticTopologyProvider::new(vec![0, 1, 2, 3], vec![0]));
    let resources = ResourceManager::new(vec![0, 1, 2, 3], vec![0]);
    let runtime = Arc::new(SubprocessContainerRuntime::new(nrm_core::resources::ResourceSet {
        cpus: vec![0, 1, 2, 3],
        mems: vec![0],
    }));
    let containers = ContainerRegistry::new(resources, runtime, topology, 0.1, 1.5);
    let applications = ApplicationRegistry::new();
    let sensors = SensorManager::new(Box::new(MockSensorDriver::new(vec![0, 1])));
    let controller = NodePowerController::new(1.0, 0.0, vec!["package-0".to_string()]);
    let state = DaemonState::new(containers, applications, sensors, controller, 0.0);
    Daemon::new(state)
}

/// Write a minimal manifest requesting zero exclusive cpus/mems (so the
/// test never depends on how many cores the host actually has). The
/// `NamedTempFile` must be kept alive by the caller for as long as the
/// `run` request needs to read it back.
fn write_manifest() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "acKind": "ImageManifest", "acVersion": "1.0.0", "name": "integration-test",
            "app": {{"environment": [], "isolators": [
                {{"name": "argo/container", "value": {{"cpus": 0, "mems": 0}}}}
            ]}}
        }}"#
    )
    .unwrap();
    file.flush().unwrap();
    file
}

async fn rpc_round_trip(stream: &mut TcpStream, request: &RpcRequest) -> RpcReply {
    let bytes = encode_rpc_request(request).unwrap();
    write_frame(stream, &bytes).await.unwrap();
    let frame = read_frame(stream, 1024 * 1024).await.unwrap().unwrap();
    decode_rpc_reply(&frame).unwrap()
}

#[tokio::test(flavor = "current_thread")]
async fn list_is_empty_before_any_container_runs() {
    let config = test_config();
    let rpc_addr = config.sockets.rpc_addr.clone();
    let daemon = build_daemon();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            tokio::task::spawn_local(async move {
                daemon.run(&config).await.unwrap();
            });
            // Give the accept loops a moment to bind before connecting.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let mut stream = TcpStream::connect(&rpc_addr).await.unwrap();
            let reply = rpc_round_trip(&mut stream, &RpcRequest::List).await;
            match reply {
                RpcReply::List { payload } => assert!(payload.is_empty()),
                other => panic!("unexpected reply: {other:?}"),
            }
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn run_then_kill_reports_process_start_and_exit() {
    let config = test_config();
    let rpc_addr = config.sockets.rpc_addr.clone();
    let daemon = build_daemon();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            tokio::task::spawn_local(async move {
                daemon.run(&config).await.unwrap();
            });
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let mut stream = TcpStream::connect(&rpc_addr).await.unwrap();
            let manifest_file = write_manifest();
            let container_uuid = ContainerId::new();

            let run_request = RpcRequest::Run {
                manifest: manifest_file.path().to_string_lossy().into_owned(),
                path: "sleep".to_string(),
                args: vec!["5".to_string()],
                container_uuid: container_uuid.clone(),
                environ: HashMap::new(),
            };
            let reply = rpc_round_trip(&mut stream, &run_request).await;
            let pid = match reply {
                RpcReply::ProcessStart { container_uuid: uuid, pid } => {
                    assert_eq!(uuid, container_uuid);
                    pid
                }
                other => panic!("unexpected reply: {other:?}"),
            };
            assert!(pid > 0);

            let list_reply = rpc_round_trip(&mut stream, &RpcRequest::List).await;
            match list_reply {
                RpcReply::List { payload } => {
                    assert_eq!(payload.len(), 1);
                    assert_eq!(payload[0].container_uuid, container_uuid);
                    assert_eq!(payload[0].pids, vec![pid]);
                }
                other => panic!("unexpected reply: {other:?}"),
            }

            let kill_reply = rpc_round_trip(
                &mut stream,
                &RpcRequest::Kill {
                    container_uuid: container_uuid.clone(),
                },
            )
            .await;
            assert!(matches!(kill_reply, RpcReply::List { .. }));

            // The killed child's exit is reconciled asynchronously by the
            // daemon's SIGCHLD-equivalent reaper; `process_exit` arrives on
            // the same connection once that happens.
            let frame = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                read_frame(&mut stream, 1024 * 1024),
            )
            .await
            .expect("timed out waiting for process_exit")
            .unwrap()
            .unwrap();
            let reply = decode_rpc_reply(&frame).unwrap();
            match reply {
                RpcReply::ProcessExit { container_uuid: uuid, .. } => {
                    assert_eq!(uuid, container_uuid);
                }
                other => panic!("expected process_exit, got {other:?}"),
            }
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn setpower_echoes_the_requested_limit() {
    let config = test_config();
    let rpc_addr = config.sockets.rpc_addr.clone();
    let daemon = build_daemon();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            tokio::task::spawn_local(async move {
                daemon.run(&config).await.unwrap();
            });
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let mut stream = TcpStream::connect(&rpc_addr).await.unwrap();
            let reply = rpc_round_trip(&mut stream, &RpcRequest::Setpower { limit: 42.0 }).await;
            match reply {
                RpcReply::Getpower { limit } => assert_eq!(limit, 42.0),
                other => panic!("unexpected reply: {other:?}"),
            }
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn run_with_unreadable_manifest_replies_run_error() {
    let config = test_config();
    let rpc_addr = config.sockets.rpc_addr.clone();
    let daemon = build_daemon();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            tokio::task::spawn_local(async move {
                daemon.run(&config).await.unwrap();
            });
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let mut stream = TcpStream::connect(&rpc_addr).await.unwrap();
            let container_uuid = ContainerId::new();
            let run_request = RpcRequest::Run {
                manifest: "/nonexistent/manifest.json".to_string(),
                path: "true".to_string(),
                args: Vec::new(),
                container_uuid: container_uuid.clone(),
                environ: HashMap::new(),
            };
            let reply = rpc_round_trip(&mut stream, &run_request).await;
            match reply {
                RpcReply::RunError { container_uuid: uuid, errno, .. } => {
                    assert_eq!(uuid, container_uuid);
                    assert_ne!(errno, 0);
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        })
        .await;
}
