//! The daemon's single-threaded mutable state: registries, sensor and
//! control loop objects, and the bookkeeping needed to route replies and
//! publishes back to connections that outlive the handler that queued
//! them (stdout/stderr forwarding, power publishes).

use crate::controller::NodePowerController;
use crate::registry::application::ApplicationRegistry;
use crate::registry::ContainerRegistry;
use crate::sensor::SensorManager;
use crate::types::{ClientId, ContainerId, Pid};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// A container's energy/time baseline, latched when its first process
/// starts, so `container_exit` can diff against it (§4.8: "take an
/// end-of-run energy snapshot, compute the energy/time/temperature/policy
/// diff").
#[derive(Debug, Clone, Copy)]
pub struct ContainerProfileStart {
    pub time: f64,
    pub energy_joules: Option<f64>,
}

/// Outbound frame queue for one connection. The RPC/event listeners give
/// every accepted connection one of these; handlers elsewhere (stdout
/// forwarders, the sensor/control ticks) address a client by id to push
/// frames onto its queue without owning the socket.
pub type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

pub struct DaemonState {
    pub containers: ContainerRegistry,
    pub applications: ApplicationRegistry,
    pub sensors: SensorManager,
    pub controller: NodePowerController,
    pub power_limit: f64,

    clients: HashMap<ClientId, FrameSender>,
    subscribers: Vec<FrameSender>,
    kill_triggers: HashMap<Pid, oneshot::Sender<()>>,
    profile_starts: HashMap<ContainerId, ContainerProfileStart>,
    next_client_id: u64,
    start: Instant,
}

impl DaemonState {
    pub fn new(
        containers: ContainerRegistry,
        applications: ApplicationRegistry,
        sensors: SensorManager,
        controller: NodePowerController,
        initial_power_limit: f64,
    ) -> Self {
        Self {
            containers,
            applications,
            sensors,
            controller,
            power_limit: initial_power_limit,
            clients: HashMap::new(),
            subscribers: Vec::new(),
            kill_triggers: HashMap::new(),
            profile_starts: HashMap::new(),
            next_client_id: 0,
            start: Instant::now(),
        }
    }

    pub fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn register_client(&mut self, sender: FrameSender) -> ClientId {
        let id = ClientId::parse(format!("client-{}", self.next_client_id))
            .expect("generated client id is never empty");
        self.next_client_id += 1;
        self.clients.insert(id.clone(), sender);
        id
    }

    pub fn unregister_client(&mut self, id: &ClientId) {
        self.clients.remove(id);
    }

    /// Best-effort: a client that has already disconnected simply misses
    /// the frame, it does not block message dispatch for everyone else.
    pub fn send_to_client(&self, id: &ClientId, frame: Vec<u8>) {
        if let Some(sender) = self.clients.get(id) {
            let _ = sender.send(frame);
        }
    }

    pub fn add_subscriber(&mut self, sender: FrameSender) {
        self.subscribers.push(sender);
    }

    pub fn publish(&mut self, frame: Vec<u8>) {
        self.subscribers.retain(|s| s.send(frame.clone()).is_ok());
    }

    pub fn client_of(&self, uuid: &crate::types::ContainerId, pid: Pid) -> Option<ClientId> {
        self.containers.client_of(uuid, pid).cloned()
    }

    pub fn register_kill_trigger(&mut self, pid: Pid, trigger: oneshot::Sender<()>) {
        self.kill_triggers.insert(pid, trigger);
    }

    /// Best-effort: fire the kill trigger for every pid in a container.
    /// Missing/already-fired triggers are silently skipped — the pid has
    /// either already exited or was already asked to die.
    pub fn kill_container(&mut self, pids: &[Pid]) {
        for pid in pids {
            if let Some(trigger) = self.kill_triggers.remove(pid) {
                let _ = trigger.send(());
            }
        }
    }

    pub fn forget_kill_trigger(&mut self, pid: Pid) {
        self.kill_triggers.remove(&pid);
    }

    /// Record a container's energy/time baseline the first time it gets
    /// a process, if one hasn't already been recorded.
    pub fn record_profile_start_if_absent(&mut self, uuid: ContainerId, start: ContainerProfileStart) {
        self.profile_starts.entry(uuid).or_insert(start);
    }

    /// Remove and return a container's profile baseline, for
    /// `container_exit` diffing at destruction time.
    pub fn take_profile_start(&mut self, uuid: &ContainerId) -> Option<ContainerProfileStart> {
        self.profile_starts.remove(uuid)
    }
}
