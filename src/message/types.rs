//! Typed request/reply/publish/event payloads for the three message
//! channels. Each enum is internally tagged on `type`; the sibling `api`
//! tag that names the channel is handled by [`super::schema`], not here,
//! so these types stay free of transport concerns.

use crate::types::{ApplicationId, ContainerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
    List,
    Run {
        manifest: String,
        path: String,
        #[serde(default)]
        args: Vec<String>,
        container_uuid: ContainerId,
        #[serde(default)]
        environ: HashMap<String, String>,
    },
    Kill {
        container_uuid: ContainerId,
    },
    Setpower {
        limit: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcReply {
    List {
        payload: Vec<ContainerListing>,
    },
    Stdout {
        container_uuid: ContainerId,
        payload: String,
    },
    Stderr {
        container_uuid: ContainerId,
        payload: String,
    },
    ProcessStart {
        container_uuid: ContainerId,
        pid: u32,
    },
    ProcessExit {
        container_uuid: ContainerId,
        status: i32,
    },
    /// Carries a non-zero errno when the `run` that preceded it failed
    /// before a process could be started (§7: ManifestInvalid,
    /// ResourceExhausted, RuntimeFailure all surface here).
    RunError {
        container_uuid: ContainerId,
        errno: i32,
        message: String,
    },
    Getpower {
        limit: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerListing {
    pub container_uuid: ContainerId,
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishMsg {
    Power {
        total: Option<f64>,
        limit: f64,
    },
    ContainerStart {
        container_uuid: ContainerId,
        errno: i32,
        power: Option<f64>,
    },
    ContainerExit {
        container_uuid: ContainerId,
        profile_data: ProfileData,
    },
    Performance {
        container_uuid: ContainerId,
        payload: f64,
    },
    Progress {
        application_uuid: ApplicationId,
        payload: f64,
    },
    Control {
        powercap: f64,
        power: f64,
        performance: f64,
        control_time: f64,
        feedback_time: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileData {
    pub energy_joules: Option<f64>,
    pub runtime_secs: f64,
    pub temperature_c: Option<f64>,
    pub final_dclevels: HashMap<u32, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownstreamEvent {
    ApplicationStart {
        container_uuid: ContainerId,
        application_uuid: ApplicationId,
    },
    ApplicationExit {
        application_uuid: ApplicationId,
    },
    Performance {
        payload: f64,
        application_uuid: ApplicationId,
        container_uuid: ContainerId,
    },
    Progress {
        payload: f64,
        application_uuid: ApplicationId,
        container_uuid: ContainerId,
    },
    PhaseContext {
        cpu: u32,
        aggregation: u64,
        computetime: f64,
        totaltime: f64,
        application_uuid: ApplicationId,
    },
}
