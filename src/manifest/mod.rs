//! ACI manifest parsing and isolator feature checks (§4.2).
//!
//! Isolator-level boolean fields arrive on the wire as JSON strings
//! (`"1"`/`"0"`/`"True"`/`"False"`), not JSON booleans — a quirk of the
//! ACI format this mirrors faithfully rather than normalizing away, since
//! `is_feature_enabled` depends on comparing the raw string.

use crate::resources::ResourceRequest;
use crate::types::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

const TRUE_VALUES: [&str; 2] = ["1", "True"];

fn is_truthy_default_enabled(enabled: &Option<String>) -> bool {
    match enabled {
        None => true,
        Some(v) => TRUE_VALUES.contains(&v.as_str()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scheduler {
    pub policy: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub enabled: Option<String>,
}

impl Scheduler {
    const CLASSES: [&'static str; 3] = ["SCHED_FIFO", "SCHED_HPC", "SCHED_OTHER"];

    fn validate(&mut self) -> Result<()> {
        if !Self::CLASSES.contains(&self.policy.as_str()) {
            return Err(Error::manifest_invalid(format!(
                "scheduler policy `{}` is not one of {:?}",
                self.policy,
                Self::CLASSES
            )));
        }
        if self.policy != "SCHED_OTHER" {
            self.priority = Some("0".to_string());
        }
        if let Some(enabled) = &self.enabled {
            if !["0", "False", "1", "True"].contains(&enabled.as_str()) {
                return Err(Error::manifest_invalid(format!(
                    "invalid value for scheduler enabled: {enabled}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSpec {
    pub cpus: usize,
    pub mems: usize,
}

impl ContainerSpec {
    pub fn as_request(&self) -> ResourceRequest {
        ResourceRequest {
            cpus: self.cpus,
            mems: self.mems,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerfWrapper {
    #[serde(default)]
    pub enabled: Option<String>,
}

impl PerfWrapper {
    fn validate(&self) -> Result<()> {
        if let Some(enabled) = &self.enabled {
            if !["0", "False", "1", "True"].contains(&enabled.as_str()) {
                return Err(Error::manifest_invalid(format!(
                    "invalid value for perfwrapper enabled: {enabled}"
                )));
            }
        }
        Ok(())
    }
}

/// One of the four power-policy kinds named in §3's power configuration
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PowerPolicyKind {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "DDCM")]
    Ddcm,
    #[serde(rename = "DVFS")]
    Dvfs,
    #[serde(rename = "COMBINED")]
    Combined,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Power {
    #[serde(default)]
    pub enabled: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub policy: Option<PowerPolicyKind>,
    #[serde(default)]
    pub damper: Option<f64>,
    #[serde(default)]
    pub slowdown: Option<f64>,
}

impl Power {
    fn validate(&self) -> Result<()> {
        for (name, v) in [("enabled", &self.enabled), ("profile", &self.profile)] {
            if let Some(v) = v {
                if !["0", "False", "1", "True"].contains(&v.as_str()) {
                    return Err(Error::manifest_invalid(format!(
                        "invalid value for power {name}: {v}"
                    )));
                }
            }
        }
        if let Some(damper) = self.damper {
            if damper < 0.0 {
                return Err(Error::manifest_invalid("power damper must be >= 0"));
            }
        }
        if let Some(slowdown) = self.slowdown {
            if slowdown < 1.0 {
                return Err(Error::manifest_invalid("power slowdown must be >= 1"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HwBind {
    #[serde(default)]
    pub enabled: Option<String>,
}

impl HwBind {
    fn validate(&self) -> Result<()> {
        if let Some(enabled) = &self.enabled {
            if !["0", "False", "1", "True"].contains(&enabled.as_str()) {
                return Err(Error::manifest_invalid(format!(
                    "invalid value for hwbind enabled: {enabled}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Monitoring {
    #[serde(default)]
    pub enabled: Option<String>,
    #[serde(default)]
    pub ratelimit: Option<f64>,
}

impl Monitoring {
    fn validate(&self) -> Result<()> {
        if let Some(enabled) = &self.enabled {
            if !["0", "False", "1", "True"].contains(&enabled.as_str()) {
                return Err(Error::manifest_invalid(format!(
                    "invalid value for monitoring enabled: {enabled}"
                )));
            }
        }
        if let Some(ratelimit) = self.ratelimit {
            if ratelimit < 0.0 {
                return Err(Error::manifest_invalid("monitoring ratelimit must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Raw isolator entry as it appears on the wire: `{"name": "argo/x",
/// "value": {...}}`.
#[derive(Debug, Clone, Deserialize)]
struct RawIsolator {
    name: String,
    value: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct Isolators {
    pub scheduler: Option<Scheduler>,
    pub container: Option<ContainerSpec>,
    pub perfwrapper: Option<PerfWrapper>,
    pub power: Option<Power>,
    pub hwbind: Option<HwBind>,
    pub monitoring: Option<Monitoring>,
}

impl Isolators {
    fn load(raw: Vec<RawIsolator>) -> Result<Self> {
        let mut out = Isolators::default();
        for entry in raw {
            match entry.name.as_str() {
                "argo/scheduler" => {
                    let mut s: Scheduler = serde_json::from_value(entry.value)?;
                    s.validate()?;
                    out.scheduler = Some(s);
                }
                "argo/container" => {
                    out.container = Some(serde_json::from_value(entry.value)?);
                }
                "argo/perfwrapper" => {
                    let p: PerfWrapper = serde_json::from_value(entry.value)?;
                    p.validate()?;
                    out.perfwrapper = Some(p);
                }
                "argo/power" => {
                    let p: Power = serde_json::from_value(entry.value)?;
                    p.validate()?;
                    out.power = Some(p);
                }
                "argo/hwbind" => {
                    let h: HwBind = serde_json::from_value(entry.value)?;
                    h.validate()?;
                    out.hwbind = Some(h);
                }
                "argo/monitoring" => {
                    let m: Monitoring = serde_json::from_value(entry.value)?;
                    m.validate()?;
                    out.monitoring = Some(m);
                }
                _ => { /* unrecognized isolators are ignored, not an error */ }
            }
        }
        if out.container.is_none() {
            return Err(Error::manifest_invalid("missing mandatory isolator: argo/container"));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawApp {
    #[serde(default)]
    environment: Vec<String>,
    isolators: Vec<RawIsolator>,
}

#[derive(Debug, Clone)]
pub struct App {
    pub environment: Vec<String>,
    pub isolators: Isolators,
}

#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
    #[serde(rename = "acKind")]
    ac_kind: String,
    #[serde(rename = "acVersion")]
    ac_version: String,
    name: String,
    app: RawApp,
}

/// A validated ACI manifest (§4.2).
#[derive(Debug, Clone)]
pub struct ImageManifest {
    pub ac_kind: String,
    pub ac_version: String,
    pub name: String,
    pub app: App,
}

impl ImageManifest {
    pub fn load_str(text: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(text)
            .map_err(|e| Error::manifest_invalid(format!("malformed manifest json: {e}")))?;
        let isolators = Isolators::load(raw.app.isolators)?;
        Ok(ImageManifest {
            ac_kind: raw.ac_kind,
            ac_version: raw.ac_version,
            name: raw.name,
            app: App {
                environment: raw.app.environment,
                isolators,
            },
        })
    }

    pub fn load_dict(value: serde_json::Value) -> Result<Self> {
        Self::load_str(&value.to_string())
    }

    /// `feature` is the isolator name without the `argo/` prefix, e.g.
    /// `"perfwrapper"`. An isolator that is present but lacks an `enabled`
    /// field counts as enabled; an absent isolator counts as disabled.
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        match feature {
            "scheduler" => self
                .app
                .isolators
                .scheduler
                .as_ref()
                .map(|s| is_truthy_default_enabled(&s.enabled))
                .unwrap_or(false),
            "perfwrapper" => self
                .app
                .isolators
                .perfwrapper
                .as_ref()
                .map(|p| is_truthy_default_enabled(&p.enabled))
                .unwrap_or(false),
            "power" => self
                .app
                .isolators
                .power
                .as_ref()
                .map(|p| is_truthy_default_enabled(&p.enabled))
                .unwrap_or(false),
            "hwbind" => self
                .app
                .isolators
                .hwbind
                .as_ref()
                .map(|h| is_truthy_default_enabled(&h.enabled))
                .unwrap_or(false),
            "monitoring" => self
                .app
                .isolators
                .monitoring
                .as_ref()
                .map(|m| is_truthy_default_enabled(&m.enabled))
                .unwrap_or(false),
            other => panic!("{other} is not a valid feature"),
        }
    }

    /// Environment variables contributed by the manifest's `environment`
    /// list (`KEY=VALUE` entries), independent of the runtime-injected
    /// variables in §6.
    pub fn environment_map(&self) -> HashMap<String, String> {
        self.app
            .environment
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json(power_isolator: &str) -> String {
        format!(
            r#"{{
                "acKind": "ImageManifest",
                "acVersion": "1.0.0",
                "name": "test-job",
                "app": {{
                    "environment": [],
                    "isolators": [
                        {{"name": "argo/container", "value": {{"cpus": 2, "mems": 1}}}}
                        {power_isolator}
                    ]
                }}
            }}"#
        )
    }

    #[test]
    fn enabled_but_silent_feature_counts_as_enabled() {
        let json = manifest_json(r#", {"name": "argo/perfwrapper", "value": {}}"#);
        let manifest = ImageManifest::load_str(&json).unwrap();
        assert!(manifest.is_feature_enabled("perfwrapper"));
    }

    #[test]
    fn explicitly_disabled_feature_is_disabled() {
        let json = manifest_json(
            r#", {"name": "argo/perfwrapper", "value": {"enabled": "0"}}"#,
        );
        let manifest = ImageManifest::load_str(&json).unwrap();
        assert!(!manifest.is_feature_enabled("perfwrapper"));
    }

    #[test]
    fn absent_isolator_is_disabled() {
        let json = manifest_json("");
        let manifest = ImageManifest::load_str(&json).unwrap();
        assert!(!manifest.is_feature_enabled("power"));
    }

    #[test]
    fn missing_container_isolator_is_invalid() {
        let json = r#"{
            "acKind": "ImageManifest",
            "acVersion": "1.0.0",
            "name": "test-job",
            "app": {"environment": [], "isolators": []}
        }"#;
        assert!(ImageManifest::load_str(json).is_err());
    }

    #[test]
    fn scheduler_forces_zero_priority_for_non_other_policy() {
        let json = format!(
            r#"{{
                "acKind": "ImageManifest",
                "acVersion": "1.0.0",
                "name": "test-job",
                "app": {{
                    "environment": [],
                    "isolators": [
                        {{"name": "argo/container", "value": {{"cpus": 2, "mems": 1}}}},
                        {{"name": "argo/scheduler", "value": {{"policy": "SCHED_FIFO", "priority": "10"}}}}
                    ]
                }}
            }}"#
        );
        let manifest = ImageManifest::load_str(&json).unwrap();
        let sched = manifest.app.isolators.scheduler.unwrap();
        assert_eq!(sched.priority.as_deref(), Some("0"));
    }

    #[test]
    fn invalid_scheduler_policy_is_rejected() {
        let json = format!(
            r#"{{
                "acKind": "ImageManifest",
                "acVersion": "1.0.0",
                "name": "test-job",
                "app": {{
                    "environment": [],
                    "isolators": [
                        {{"name": "argo/container", "value": {{"cpus": 2, "mems": 1}}}},
                        {{"name": "argo/scheduler", "value": {{"policy": "BOGUS"}}}}
                    ]
                }}
            }}"#
        );
        assert!(ImageManifest::load_str(&json).is_err());
    }
}
