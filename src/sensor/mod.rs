//! Sensor Manager (§4.4): wraps the RAPL/hwmon driver behind a narrow
//! trait and turns raw energy counters into power readings.
//!
//! The actual hardware access (`/sys/class/powercap/...`) is deliberately
//! out of scope (§1) — `SensorDriver` is the seam, with a process-backed
//! reference implementation suitable for integration tests and
//! development nodes without RAPL access.

use crate::types::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PowercapReading {
    pub domain: String,
    pub current_w: f64,
    pub min_w: f64,
    pub max_w: f64,
    pub enabled: bool,
}

/// The external hardware seam: per-package cumulative energy counters,
/// temperature, and RAPL power-cap domains.
#[async_trait]
pub trait SensorDriver: Send + Sync {
    fn package_ids(&self) -> Vec<u32>;
    async fn read_energy_joules(&self, package: u32) -> Result<f64>;
    async fn read_temperature_c(&self, package: u32) -> Result<f64>;
    async fn read_powercaps(&self) -> Result<Vec<PowercapReading>>;
    async fn write_powercap(&self, domain: &str, watts: f64) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct Energy {
    pub per_package_watts: HashMap<u32, f64>,
    pub total_watts: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Temperature {
    pub per_package_celsius: HashMap<u32, f64>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub time: f64,
    pub energy: Energy,
    pub temperature: Temperature,
    pub powercaps: Vec<PowercapReading>,
}

pub struct SensorManager {
    driver: Box<dyn SensorDriver>,
    baseline_energy: HashMap<u32, f64>,
    baseline_time: f64,
}

impl SensorManager {
    pub fn new(driver: Box<dyn SensorDriver>) -> Self {
        Self {
            driver,
            baseline_energy: HashMap::new(),
            baseline_time: 0.0,
        }
    }

    /// Latch a monotonic energy baseline per package. Must be called
    /// before the first `sample()`.
    pub async fn start(&mut self, now: f64) -> Result<()> {
        self.baseline_time = now;
        for package in self.driver.package_ids() {
            let joules = self.driver.read_energy_joules(package).await?;
            self.baseline_energy.insert(package, joules);
        }
        Ok(())
    }

    /// Sample all packages and derive power from the energy delta since
    /// the last sample. Rebaselines after every call (Δt is always
    /// against the previous sample, not the original `start()` call).
    pub async fn sample(&mut self, now: f64) -> Result<Snapshot> {
        let dt = now - self.baseline_time;
        if dt <= 0.0 {
            return Err(Error::sensor_malformed(
                "sample time did not advance past the previous baseline",
            ));
        }

        let mut per_package_watts = HashMap::new();
        let mut per_package_celsius = HashMap::new();
        let mut total = 0.0;
        let mut any_enabled = false;

        let powercaps = self.driver.read_powercaps().await?;
        let enabled_domains: Vec<u32> = self.driver.package_ids();

        for &package in &enabled_domains {
            let cumulative = self.driver.read_energy_joules(package).await?;
            let baseline = *self
                .baseline_energy
                .get(&package)
                .ok_or_else(|| Error::sensor_malformed(format!("no baseline for package {package}")))?;
            let watts = (cumulative - baseline) / dt;
            self.baseline_energy.insert(package, cumulative);
            per_package_watts.insert(package, watts);

            let temp = self.driver.read_temperature_c(package).await?;
            per_package_celsius.insert(package, temp);

            let package_domain = format!("package-{package}");
            let package_enabled = powercaps
                .iter()
                .find(|pc| pc.domain == package_domain)
                .map(|pc| pc.enabled)
                .unwrap_or(true);
            if package_enabled {
                total += watts;
                any_enabled = true;
            }
        }

        self.baseline_time = now;

        Ok(Snapshot {
            time: now,
            energy: Energy {
                per_package_watts,
                total_watts: if any_enabled { Some(total) } else { None },
            },
            temperature: Temperature { per_package_celsius },
            powercaps,
        })
    }

    /// Sum of raw cumulative per-package energy counters, independent of
    /// the rebaselining `sample()` does — used to diff a container's
    /// energy consumption across its lifetime for `container_exit`
    /// profiling (§4.8), not for the periodic power publish.
    pub async fn raw_energy_joules_total(&self) -> Result<f64> {
        let mut total = 0.0;
        for package in self.driver.package_ids() {
            total += self.driver.read_energy_joules(package).await?;
        }
        Ok(total)
    }

    /// Mean package temperature, for the same container profiling use.
    pub async fn mean_temperature_c(&self) -> Result<Option<f64>> {
        let packages = self.driver.package_ids();
        if packages.is_empty() {
            return Ok(None);
        }
        let mut sum = 0.0;
        for package in &packages {
            sum += self.driver.read_temperature_c(*package).await?;
        }
        Ok(Some(sum / packages.len() as f64))
    }

    pub async fn get_powerlimits(&self) -> Result<Vec<PowercapReading>> {
        let all = self.driver.read_powercaps().await?;
        Ok(all.into_iter().filter(|pc| pc.enabled).collect())
    }

    pub async fn set_powerlimit(&self, domain: &str, watts: f64) -> Result<()> {
        let caps = self.driver.read_powercaps().await?;
        let cap = caps
            .iter()
            .find(|pc| pc.domain == domain)
            .ok_or_else(|| Error::runtime_failure(format!("unknown rapl domain {domain}")))?;
        let clamped = watts.clamp(cap.min_w, cap.max_w);
        self.driver.write_powercap(domain, clamped).await
    }
}

/// In-memory reference driver: fixed package count, monotonically
/// increasing synthetic energy counters. Useful for tests and for running
/// the daemon on a node without RAPL access.
pub struct MockSensorDriver {
    packages: Vec<u32>,
    powercaps: tokio::sync::Mutex<Vec<PowercapReading>>,
}

impl MockSensorDriver {
    pub fn new(packages: Vec<u32>) -> Self {
        let powercaps = packages
            .iter()
            .map(|p| PowercapReading {
                domain: format!("package-{p}"),
                current_w: 150.0,
                min_w: 30.0,
                max_w: 300.0,
                enabled: true,
            })
            .collect();
        Self {
            packages,
            powercaps: tokio::sync::Mutex::new(powercaps),
        }
    }
}

#[async_trait]
impl SensorDriver for MockSensorDriver {
    fn package_ids(&self) -> Vec<u32> {
        self.packages.clone()
    }

    async fn read_energy_joules(&self, package: u32) -> Result<f64> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(now.as_secs_f64() * 10.0 + package as f64)
    }

    async fn read_temperature_c(&self, _package: u32) -> Result<f64> {
        Ok(55.0)
    }

    async fn read_powercaps(&self) -> Result<Vec<PowercapReading>> {
        Ok(self.powercaps.lock().await.clone())
    }

    async fn write_powercap(&self, domain: &str, watts: f64) -> Result<()> {
        let mut caps = self.powercaps.lock().await;
        if let Some(cap) = caps.iter_mut().find(|pc| pc.domain == domain) {
            cap.current_w = watts;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_requires_start_first() {
        let driver = MockSensorDriver::new(vec![0, 1]);
        let mut mgr = SensorManager::new(Box::new(driver));
        mgr.start(0.0).await.unwrap();
        let snap = mgr.sample(1.0).await.unwrap();
        assert!(snap.energy.total_watts.is_some());
        assert_eq!(snap.energy.per_package_watts.len(), 2);
    }

    #[tokio::test]
    async fn total_sums_enabled_packages() {
        let driver = MockSensorDriver::new(vec![0, 1]);
        let mut mgr = SensorManager::new(Box::new(driver));
        mgr.start(0.0).await.unwrap();
        let snap = mgr.sample(1.0).await.unwrap();
        let expected: f64 = snap.energy.per_package_watts.values().sum();
        assert!((snap.energy.total_watts.unwrap() - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn set_powerlimit_clamps_into_domain_bounds() {
        let driver = MockSensorDriver::new(vec![0]);
        let mgr = SensorManager::new(Box::new(driver));
        mgr.set_powerlimit("package-0", 1000.0).await.unwrap();
        let caps = mgr.get_powerlimits().await.unwrap();
        assert_eq!(caps[0].current_w, 300.0);
    }

    #[tokio::test]
    async fn raw_energy_total_sums_all_packages() {
        let driver = MockSensorDriver::new(vec![0, 1]);
        let mgr = SensorManager::new(Box::new(driver));
        let total = mgr.raw_energy_joules_total().await.unwrap();
        assert!(total > 0.0);
    }

    #[tokio::test]
    async fn mean_temperature_averages_packages() {
        let driver = MockSensorDriver::new(vec![0, 1]);
        let mgr = SensorManager::new(Box::new(driver));
        let mean = mgr.mean_temperature_c().await.unwrap();
        assert_eq!(mean, Some(55.0));
    }

    #[tokio::test]
    async fn get_powerlimits_only_returns_enabled_domains() {
        let driver = MockSensorDriver::new(vec![0]);
        let mgr = SensorManager::new(Box::new(driver));
        let limits = mgr.get_powerlimits().await.unwrap();
        assert_eq!(limits.len(), 1);
        assert!(limits[0].enabled);
    }
}
