//! Container and process registry (§4.6): the arena that owns every
//! `Container` and `Process` on the node, and builds the argv/environment
//! a launched process runs with.

pub mod application;

use crate::ddcm::PowerPolicyManager;
use crate::manifest::{ImageManifest, PowerPolicyKind};
use crate::resources::{ResourceManager, ResourceSet};
use crate::runtime::{ContainerRuntime, SpawnedProcess};
use crate::topology::TopologyProvider;
use crate::types::{ClientId, ContainerId, Error, Pid, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Child;

/// A live child process under the daemon. `exited` flips true only when
/// the daemon's SIGCHLD reconciliation has reaped it — a process that
/// merely closed its pipes is not yet terminal.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub exited: bool,
}

/// §3's per-container power configuration record.
#[derive(Debug, Clone)]
pub struct PowerConfig {
    pub policy_kind: PowerPolicyKind,
    pub damper_secs: f64,
    pub slowdown: f64,
    pub profile: Option<String>,
}

/// A compute isolation domain on the node (§3). Owns every `Process`
/// running inside it and, when a power policy is active, the DDCM
/// manager driving its cpus.
pub struct Container {
    pub uuid: ContainerId,
    pub manifest: ImageManifest,
    pub resources: ResourceSet,
    pub power_config: PowerConfig,
    pub hwbindings: Vec<ResourceSet>,
    pub processes: HashMap<Pid, Process>,
    pub client_of: HashMap<Pid, ClientId>,
    pub policy: Option<PowerPolicyManager>,
}

impl Container {
    fn next_bind_index(&self) -> usize {
        if self.hwbindings.is_empty() {
            0
        } else {
            self.processes.len() % self.hwbindings.len()
        }
    }
}

/// A `run` request as decoded off the RPC channel, plus the client id the
/// ROUTER-style transport attached to the frame.
pub struct RunRequest {
    pub client: ClientId,
    pub manifest_path: String,
    pub command: String,
    pub args: Vec<String>,
    pub container_uuid: ContainerId,
    pub environ: HashMap<String, String>,
}

/// Everything the daemon needs to finish wiring up a freshly started
/// process: its pid, the child handle to multiplex in `FuturesUnordered`,
/// and whether this was the first process in its container (gates the
/// `container_start` publish per §4.8).
pub struct CreateOutcome {
    pub pid: Pid,
    pub child: Child,
    pub is_first_process: bool,
}

pub struct ContainerRegistry {
    containers: HashMap<ContainerId, Container>,
    pid_index: HashMap<Pid, ContainerId>,
    resources: ResourceManager,
    runtime: Arc<dyn ContainerRuntime>,
    topology: Arc<dyn TopologyProvider>,
    default_damper: f64,
    default_slowdown: f64,
}

impl ContainerRegistry {
    pub fn new(
        resources: ResourceManager,
        runtime: Arc<dyn ContainerRuntime>,
        topology: Arc<dyn TopologyProvider>,
        default_damper: f64,
        default_slowdown: f64,
    ) -> Self {
        Self {
            containers: HashMap::new(),
            pid_index: HashMap::new(),
            resources,
            runtime,
            topology,
            default_damper,
            default_slowdown,
        }
    }

    pub fn get(&self, uuid: &ContainerId) -> Option<&Container> {
        self.containers.get(uuid)
    }

    pub fn container_of_pid(&self, pid: Pid) -> Option<&ContainerId> {
        self.pid_index.get(&pid)
    }

    pub fn list(&self) -> Vec<(ContainerId, Vec<Pid>)> {
        self.containers
            .iter()
            .map(|(uuid, c)| (uuid.clone(), c.processes.keys().copied().collect()))
            .collect()
    }

    /// Create a container (or add a process to an existing one) and
    /// execute the requested command inside it.
    pub async fn create(&mut self, request: RunRequest) -> Result<CreateOutcome> {
        let is_first_process = !self.containers.contains_key(&request.container_uuid);

        if is_first_process {
            let manifest_text = tokio::fs::read_to_string(&request.manifest_path)
                .await
                .map_err(|e| {
                    Error::manifest_invalid(format!(
                        "cannot read manifest {}: {e}",
                        request.manifest_path
                    ))
                })?;
            let manifest = ImageManifest::load_str(&manifest_text)?;

            let container_spec = manifest
                .app
                .isolators
                .container
                .clone()
                .ok_or_else(|| Error::manifest_invalid("manifest missing argo/container"))?;
            let resource_request = container_spec.as_request();

            let allocated = self
                .resources
                .schedule(&request.container_uuid, &resource_request);
            if allocated.cpus.len() < resource_request.cpus && resource_request.cpus > 0 {
                self.resources.release(&request.container_uuid).ok();
                return Err(Error::resource_exhausted(format!(
                    "requested {} cpus, only {} available",
                    resource_request.cpus,
                    allocated.cpus.len()
                )));
            }

            self.runtime
                .create(request.container_uuid.as_str(), &allocated)
                .await?;

            let hwbindings = if manifest.is_feature_enabled("hwbind") {
                self.topology
                    .distrib(allocated.cpus.len().max(1), &allocated)
                    .await?
            } else {
                Vec::new()
            };

            let power_config = build_power_config(&manifest, self.default_damper, self.default_slowdown);
            let policy = if power_config.policy_kind != PowerPolicyKind::None {
                Some(PowerPolicyManager::new(
                    &allocated.cpus,
                    power_config.damper_secs,
                    power_config.slowdown,
                ))
            } else {
                None
            };

            let container = Container {
                uuid: request.container_uuid.clone(),
                manifest,
                resources: allocated,
                power_config,
                hwbindings,
                processes: HashMap::new(),
                client_of: HashMap::new(),
                policy,
            };
            self.containers.insert(request.container_uuid.clone(), container);
        }

        let container = self
            .containers
            .get_mut(&request.container_uuid)
            .expect("just inserted or already present");

        let bind_index = container.next_bind_index();
        let binding = container.hwbindings.get(bind_index).cloned();

        let argv = build_argv(&container.manifest, &request.command, &request.args, binding.as_ref());
        let env = build_environment(
            &container.manifest,
            &request.container_uuid,
            &container.power_config,
            &request.environ,
        );

        let spawned: SpawnedProcess = match self
            .runtime
            .execute(request.container_uuid.as_str(), &argv, &env)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                if is_first_process {
                    self.resources.release(&request.container_uuid).ok();
                    self.containers.remove(&request.container_uuid);
                }
                return Err(e);
            }
        };

        container
            .processes
            .insert(spawned.pid, Process { pid: spawned.pid, exited: false });
        container.client_of.insert(spawned.pid, request.client);
        self.pid_index.insert(spawned.pid, request.container_uuid.clone());

        Ok(CreateOutcome {
            pid: spawned.pid,
            child: spawned.child,
            is_first_process,
        })
    }

    /// Best-effort terminate every process in a container. Does not
    /// remove the container — SIGCHLD reconciliation does that once every
    /// process has actually exited.
    pub fn kill(&self, uuid: &ContainerId) -> Result<Vec<Pid>> {
        let container = self
            .containers
            .get(uuid)
            .ok_or_else(|| Error::unknown_container(uuid.to_string()))?;
        Ok(container.processes.keys().copied().collect())
    }

    /// Reconcile a reaped pid: remove it from both indices and, if it was
    /// the container's last process, tear the container down and return
    /// its uuid plus the final DDCM levels for `container_exit` telemetry.
    pub fn reap(&mut self, pid: Pid) -> Result<ReapOutcome> {
        let uuid = self
            .pid_index
            .remove(&pid)
            .ok_or_else(|| Error::internal(format!("reaped unknown pid {pid}")))?;

        let container_emptied = {
            let container = self
                .containers
                .get_mut(&uuid)
                .ok_or_else(|| Error::unknown_container(uuid.to_string()))?;
            container.processes.remove(&pid);
            container.client_of.remove(&pid);
            container.processes.is_empty()
        };

        if !container_emptied {
            return Ok(ReapOutcome {
                container_uuid: uuid,
                container_destroyed: false,
                final_dclevels: HashMap::new(),
            });
        }

        let container = self.containers.remove(&uuid).expect("checked above");
        let final_dclevels = container
            .policy
            .as_ref()
            .map(PowerPolicyManager::dclevels)
            .unwrap_or_default();
        self.resources.release(&uuid).ok();

        Ok(ReapOutcome {
            container_uuid: uuid,
            container_destroyed: true,
            final_dclevels,
        })
    }

    pub fn policy_mut(&mut self, uuid: &ContainerId) -> Option<&mut PowerPolicyManager> {
        self.containers.get_mut(uuid).and_then(|c| c.policy.as_mut())
    }

    pub fn client_of(&self, uuid: &ContainerId, pid: Pid) -> Option<&ClientId> {
        self.containers.get(uuid).and_then(|c| c.client_of.get(&pid))
    }
}

pub struct ReapOutcome {
    pub container_uuid: ContainerId,
    pub container_destroyed: bool,
    pub final_dclevels: HashMap<u32, u32>,
}

fn build_power_config(manifest: &ImageManifest, default_damper: f64, default_slowdown: f64) -> PowerConfig {
    let Some(power) = &manifest.app.isolators.power else {
        return PowerConfig {
            policy_kind: PowerPolicyKind::None,
            damper_secs: default_damper,
            slowdown: default_slowdown,
            profile: None,
        };
    };
    if !manifest.is_feature_enabled("power") {
        return PowerConfig {
            policy_kind: PowerPolicyKind::None,
            damper_secs: default_damper,
            slowdown: default_slowdown,
            profile: None,
        };
    }
    PowerConfig {
        policy_kind: power.policy.unwrap_or(PowerPolicyKind::None),
        damper_secs: power.damper.unwrap_or(default_damper),
        slowdown: power.slowdown.unwrap_or(default_slowdown),
        profile: power.profile.clone(),
    }
}

fn build_argv(
    manifest: &ImageManifest,
    command: &str,
    args: &[String],
    binding: Option<&ResourceSet>,
) -> Vec<String> {
    let mut argv = Vec::new();

    if manifest.is_feature_enabled("scheduler") {
        if let Some(sched) = &manifest.app.isolators.scheduler {
            let flag = match sched.policy.as_str() {
                "SCHED_FIFO" => "fifo",
                "SCHED_HPC" => "hpc",
                _ => "other",
            };
            argv.push("chrt".to_string());
            argv.push(format!("--{flag}"));
            argv.push(sched.priority.clone().unwrap_or_else(|| "0".to_string()));
        }
    }

    if manifest.is_feature_enabled("perfwrapper") {
        argv.push("perf".to_string());
        argv.push("stat".to_string());
    }

    if manifest.is_feature_enabled("hwbind") {
        if let Some(binding) = binding {
            let cpus = binding.cpus.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            let mems = binding.mems.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            argv.push("hwloc-bind".to_string());
            argv.push(format!("core:{cpus}"));
            argv.push("--membind".to_string());
            argv.push(format!("numa:{mems}"));
        }
    }

    argv.push(command.to_string());
    argv.extend(args.iter().cloned());
    argv
}

fn build_environment(
    manifest: &ImageManifest,
    container_uuid: &ContainerId,
    power_config: &PowerConfig,
    requested_environ: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = manifest.environment_map();
    env.extend(requested_environ.clone());
    env.insert("ARGO_CONTAINER_UUID".to_string(), container_uuid.to_string());
    env.insert("AC_APP_NAME".to_string(), manifest.name.clone());
    env.insert("AC_METADATA_URL".to_string(), "localhost".to_string());

    if power_config.policy_kind != PowerPolicyKind::None {
        env.insert("LD_PRELOAD".to_string(), "libnrm.so".to_string());
        env.insert("NRM_TRANSMIT".to_string(), "1".to_string());
        let damper_ns = (power_config.damper_secs * 1_000_000_000.0).round() as i64;
        env.insert("NRM_DAMPER".to_string(), damper_ns.to_string());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ImageManifest;

    fn manifest_with_power(policy: &str) -> ImageManifest {
        let json = format!(
            r#"{{
                "acKind": "ImageManifest", "acVersion": "1.0.0", "name": "job",
                "app": {{"environment": [], "isolators": [
                    {{"name": "argo/container", "value": {{"cpus": 1, "mems": 1}}}},
                    {{"name": "argo/power", "value": {{"policy": "{policy}", "damper": 0.2, "slowdown": 2.0}}}}
                ]}}
            }}"#
        );
        ImageManifest::load_str(&json).unwrap()
    }

    #[test]
    fn power_config_carries_manifest_damper_in_seconds() {
        let manifest = manifest_with_power("DDCM");
        let config = build_power_config(&manifest, 0.1, 1.5);
        assert_eq!(config.policy_kind, PowerPolicyKind::Ddcm);
        assert_eq!(config.damper_secs, 0.2);
    }

    #[test]
    fn environment_injects_nanosecond_damper_when_policy_active() {
        let manifest = manifest_with_power("DDCM");
        let config = build_power_config(&manifest, 0.1, 1.5);
        let uuid = ContainerId::new();
        let env = build_environment(&manifest, &uuid, &config, &HashMap::new());
        assert_eq!(env.get("NRM_DAMPER").unwrap(), "200000000");
        assert_eq!(env.get("NRM_TRANSMIT").unwrap(), "1");
    }

    #[test]
    fn no_policy_env_injected_when_power_policy_is_none() {
        let json = r#"{
            "acKind": "ImageManifest", "acVersion": "1.0.0", "name": "job",
            "app": {"environment": [], "isolators": [
                {"name": "argo/container", "value": {"cpus": 1, "mems": 1}}
            ]}
        }"#;
        let manifest = ImageManifest::load_str(json).unwrap();
        let config = build_power_config(&manifest, 0.1, 1.5);
        let uuid = ContainerId::new();
        let env = build_environment(&manifest, &uuid, &config, &HashMap::new());
        assert!(!env.contains_key("NRM_DAMPER"));
    }

    #[test]
    fn argv_prefix_orders_scheduler_then_perf_then_hwbind() {
        let json = r#"{
            "acKind": "ImageManifest", "acVersion": "1.0.0", "name": "job",
            "app": {"environment": [], "isolators": [
                {"name": "argo/container", "value": {"cpus": 1, "mems": 1}},
                {"name": "argo/scheduler", "value": {"policy": "SCHED_HPC"}},
                {"name": "argo/perfwrapper", "value": {}},
                {"name": "argo/hwbind", "value": {}}
            ]}
        }"#;
        let manifest = ImageManifest::load_str(json).unwrap();
        let binding = ResourceSet { cpus: vec![0], mems: vec![0] };
        let argv = build_argv(&manifest, "myapp", &["--flag".to_string()], Some(&binding));
        assert_eq!(
            argv,
            vec![
                "chrt", "--hpc", "0", "perf", "stat", "hwloc-bind", "core:0", "--membind", "numa:0",
                "myapp", "--flag"
            ]
        );
    }
}
