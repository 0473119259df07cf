//! Daemon Core (§4.8): binds the three sockets, owns every registry, and
//! runs the single-threaded cooperative event loop described in §5.
//!
//! The loop is a single `tokio::select!` over: SIGINT, freshly reaped
//! children (multiplexed through a `FuturesUnordered`, §9's
//! "coroutine/async-callback style... maps to an explicit task-per-socket
//! plus a periodic-timer task"), and the sensor/control periodic ticks.
//! Every branch runs its handler to completion before the loop polls
//! again — there is no interleaving within a single iteration, matching
//! §5's "all handlers run to completion on [the loop]".

pub mod dispatch;
pub mod event;
pub mod pubsub;
pub mod reconcile;
pub mod rpc;
pub mod state;

use self::reconcile::ReapedChild;
use self::state::DaemonState;
use crate::message::schema::encode_publish;
use crate::message::types::{ProfileData, PublishMsg, RpcReply};
use crate::types::{Config, Error, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::cell::RefCell;
use std::os::unix::fs::FileTypeExt;
use std::rc::Rc;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Daemon {
    state: Rc<RefCell<DaemonState>>,
}

impl Daemon {
    pub fn new(state: DaemonState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Bind the three sockets, start the sensor baseline, and run until
    /// SIGINT (§4.8, §5). Must be run on a `LocalSet` — handlers use
    /// `tokio::task::spawn_local` and `Rc<RefCell<_>>` state, matching
    /// the single-threaded-cooperative scheduling model (§5).
    pub async fn run(self, config: &Config) -> Result<()> {
        let rpc_listener = TcpListener::bind(&config.sockets.rpc_addr)
            .await
            .map_err(Error::Io)?;
        let pub_listener = TcpListener::bind(&config.sockets.pub_addr)
            .await
            .map_err(Error::Io)?;

        remove_stale_socket(&config.sockets.event_socket_path);
        let event_listener =
            UnixListener::bind(&config.sockets.event_socket_path).map_err(Error::Io)?;

        tracing::info!(
            rpc = %config.sockets.rpc_addr,
            publish = %config.sockets.pub_addr,
            event = %config.sockets.event_socket_path,
            "daemon core listening"
        );

        let max_frame_bytes = config.message.max_frame_bytes;
        let (reap_tx, mut reap_rx) = mpsc::unbounded_channel::<reconcile::ReapFuture>();
        let mut reaping = FuturesUnordered::new();

        // Cancelled on SIGINT so the three accept loops stop taking new
        // connections during shutdown instead of being silently dropped
        // when the process exits.
        let shutdown = CancellationToken::new();

        self.spawn_rpc_accept_loop(rpc_listener, max_frame_bytes, reap_tx, shutdown.clone());
        self.spawn_pub_accept_loop(pub_listener, shutdown.clone());
        self.spawn_event_accept_loop(event_listener, max_frame_bytes, shutdown.clone());

        let start_result = {
            let now = self.state.borrow().now_secs();
            let mut state_mut = self.state.borrow_mut();
            state_mut.sensors.start(now).await
        };
        if let Err(e) = start_result {
            tracing::error!(error = %e, "sensor manager failed to start");
        }

        let mut sensor_tick = tokio::time::interval(config.policy.sensor_period);
        let mut control_tick = tokio::time::interval(config.policy.control_period);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("SIGINT received, shutting down");
                    shutdown.cancel();
                    break;
                }
                Some(reap_future) = reap_rx.recv() => {
                    reaping.push(reap_future);
                }
                Some(reaped) = reaping.next(), if !reaping.is_empty() => {
                    self.handle_reaped(reaped).await;
                }
                _ = sensor_tick.tick() => {
                    self.handle_sensor_tick().await;
                }
                _ = control_tick.tick() => {
                    self.handle_control_tick().await;
                }
            }
        }

        Ok(())
    }

    fn spawn_rpc_accept_loop(
        &self,
        listener: TcpListener,
        max_frame_bytes: u32,
        reap_tx: mpsc::UnboundedSender<reconcile::ReapFuture>,
        shutdown: CancellationToken,
    ) {
        let state = self.state.clone();
        tokio::task::spawn_local(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown.cancelled() => break,
                };
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "accepted rpc connection");
                        let state = state.clone();
                        let reap_tx = reap_tx.clone();
                        tokio::task::spawn_local(async move {
                            rpc::handle_rpc_connection(state, stream, max_frame_bytes, reap_tx).await;
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "rpc accept failed"),
                }
            }
        });
    }

    fn spawn_pub_accept_loop(&self, listener: TcpListener, shutdown: CancellationToken) {
        let state = self.state.clone();
        tokio::task::spawn_local(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown.cancelled() => break,
                };
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "accepted subscriber connection");
                        pubsub::handle_subscriber_connection(state.clone(), stream);
                    }
                    Err(e) => tracing::warn!(error = %e, "publish accept failed"),
                }
            }
        });
    }

    fn spawn_event_accept_loop(
        &self,
        listener: UnixListener,
        max_frame_bytes: u32,
        shutdown: CancellationToken,
    ) {
        let state = self.state.clone();
        tokio::task::spawn_local(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown.cancelled() => break,
                };
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = state.clone();
                        tokio::task::spawn_local(async move {
                            event::handle_event_connection(state, stream, max_frame_bytes).await;
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "downstream event accept failed"),
                }
            }
        });
    }

    /// SIGCHLD reconciliation (§4.8), reached here once `reconcile`'s
    /// per-child future resolves: reply `process_exit` to the owning
    /// client, and if this was the container's last process, publish
    /// `container_exit` with its energy/time/temperature/policy diff and
    /// let the registry release its resources.
    async fn handle_reaped(&self, reaped: ReapedChild) {
        let ReapedChild {
            container_uuid,
            pid,
            status,
        } = reaped;
        let status_code = status.and_then(|s| s.code()).unwrap_or(-1);

        let client = self.state.borrow().client_of(&container_uuid, pid);

        let reap_outcome = {
            let mut state_mut = self.state.borrow_mut();
            state_mut.forget_kill_trigger(pid);
            state_mut.containers.reap(pid)
        };

        let reap_outcome = match reap_outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, pid = %pid, "sigchld reconciliation failed");
                return;
            }
        };

        if let Some(client) = client {
            let reply = RpcReply::ProcessExit {
                container_uuid: container_uuid.clone(),
                status: status_code,
            };
            match crate::message::schema::encode_rpc_reply(&reply) {
                Ok(bytes) => self.state.borrow().send_to_client(&client, bytes),
                Err(e) => tracing::error!(error = %e, "failed to encode process_exit reply"),
            }
        }

        if !reap_outcome.container_destroyed {
            return;
        }

        self.state
            .borrow_mut()
            .applications
            .delete_for_container(&container_uuid);

        let profile_data = self.build_profile_data(&container_uuid, reap_outcome.final_dclevels).await;

        let publish = PublishMsg::ContainerExit {
            container_uuid: container_uuid.clone(),
            profile_data,
        };
        match encode_publish(&publish) {
            Ok(bytes) => self.state.borrow_mut().publish(bytes),
            Err(e) => tracing::error!(error = %e, "failed to encode container_exit publish"),
        }
    }

    async fn build_profile_data(
        &self,
        container_uuid: &crate::types::ContainerId,
        final_dclevels: std::collections::HashMap<u32, u32>,
    ) -> ProfileData {
        let start = self.state.borrow_mut().take_profile_start(container_uuid);
        let now = self.state.borrow().now_secs();

        let end_energy = {
            let state_ref = self.state.borrow();
            state_ref.sensors.raw_energy_joules_total().await
        }
        .ok();
        let end_temperature = {
            let state_ref = self.state.borrow();
            state_ref.sensors.mean_temperature_c().await
        }
        .ok()
        .flatten();

        let (energy_joules, runtime_secs) = match start {
            Some(start) => {
                let energy = match (end_energy, start.energy_joules) {
                    (Some(end), Some(begin)) => Some(end - begin),
                    _ => None,
                };
                (energy, now - start.time)
            }
            None => (None, 0.0),
        };

        ProfileData {
            energy_joules,
            runtime_secs,
            temperature_c: end_temperature,
            final_dclevels,
        }
    }

    /// Sensor callback (§4.8, every `sensor_period`): snapshot, publish
    /// `power`, and feed the controller's power series. A malformed
    /// snapshot suppresses the publish for this tick only (§7
    /// `SensorMalformed`).
    async fn handle_sensor_tick(&self) {
        let now = self.state.borrow().now_secs();
        let snapshot = {
            let mut state_mut = self.state.borrow_mut();
            state_mut.sensors.sample(now).await
        };

        match snapshot {
            Ok(snapshot) => {
                let limit = self.state.borrow().power_limit;
                let publish = PublishMsg::Power {
                    total: snapshot.energy.total_watts,
                    limit,
                };
                match encode_publish(&publish) {
                    Ok(bytes) => self.state.borrow_mut().publish(bytes),
                    Err(e) => tracing::error!(error = %e, "failed to encode power publish"),
                }
                if let Some(total) = snapshot.energy.total_watts {
                    self.state.borrow_mut().controller.feed_power(now, total);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "sensor sample malformed, suppressing power publish");
            }
        }
    }

    /// Control callback (§4.8, every `control_period`): invoke a
    /// controller step and publish its telemetry if one fired.
    async fn handle_control_tick(&self) {
        let now = self.state.borrow().now_secs();
        let telemetry = self.state.borrow_mut().controller.step(now);
        let Some(telemetry) = telemetry else {
            return;
        };
        let publish = PublishMsg::Control {
            powercap: telemetry.cap,
            power: telemetry.power,
            performance: telemetry.perf,
            control_time: telemetry.control_start,
            feedback_time: telemetry.feedback_end,
        };
        match encode_publish(&publish) {
            Ok(bytes) => self.state.borrow_mut().publish(bytes),
            Err(e) => tracing::error!(error = %e, "failed to encode control publish"),
        }
    }
}

/// A prior unclean shutdown can leave the downstream event socket file
/// behind; `UnixListener::bind` refuses to reuse it. Only ever remove it
/// if it is in fact a socket, never an arbitrary file at that path.
fn remove_stale_socket(path: &str) {
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.file_type().is_socket() {
            let _ = std::fs::remove_file(path);
        }
    }
}
