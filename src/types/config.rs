//! Daemon configuration, loaded from environment variables with the §6
//! socket defaults and §4.5/§4.7 policy defaults as fallbacks.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sockets: SocketConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub policy: PolicyDefaults,

    #[serde(default)]
    pub message: MessageConfig,
}

/// The three transport endpoints named in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Upstream RPC, ROUTER/DEALER (request/reply, client-identified).
    pub rpc_addr: String,

    /// Upstream publish, PUB/SUB broadcast.
    pub pub_addr: String,

    /// Downstream event, request-only, local IPC.
    pub event_socket_path: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "0.0.0.0:3456".to_string(),
            pub_addr: "0.0.0.0:2345".to_string(),
            event_socket_path: "/tmp/nrm-downstream-event".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Defaults for the sensor/control loop and the per-container power policy
/// when a manifest's `argo/power` isolator leaves a field unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Sensor sampling period (§4.8: "every 1s").
    #[serde(with = "humantime_serde")]
    pub sensor_period: Duration,

    /// Node power controller step period (§4.8: "every 1s").
    #[serde(with = "humantime_serde")]
    pub control_period: Duration,

    /// DDCM damper, in seconds, used when a manifest omits `damper`.
    pub damper_secs: f64,

    /// DDCM slowdown ratio, used when a manifest omits `slowdown`.
    pub slowdown: f64,

    /// RAPL domains programmed by `NodePowerController::command` —
    /// defaults to the two-package configuration seen on typical
    /// dual-socket HPC nodes.
    pub rapl_domains: Vec<String>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            sensor_period: Duration::from_secs(1),
            control_period: Duration::from_secs(1),
            damper_secs: 0.1,
            slowdown: 1.5,
            rapl_domains: vec!["package-0".to_string(), "package-1".to_string()],
        }
    }
}

/// Wire-frame limits for the JSON message layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Maximum frame payload size in bytes; frames larger than this are
    /// rejected before JSON parsing is attempted.
    pub max_frame_bytes: u32,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
        }
    }
}
