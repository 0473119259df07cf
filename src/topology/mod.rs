//! Hardware topology provider (§6): the `HwlocClient`-style interface
//! that reports and partitions node topology. Real hwloc probing is out
//! of scope (§1) — this module is the trait seam plus a reference
//! implementation usable on any node via `/sys/devices/system/cpu`.

use crate::resources::ResourceSet;
use crate::types::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// All cpu ids and memory-node ids on the node.
    async fn info(&self) -> Result<ResourceSet>;

    /// `n` disjoint bindings, each a subset of `restrict`, used to pin a
    /// container's processes to distinct cores/memory nodes.
    async fn distrib(&self, n: usize, restrict: &ResourceSet) -> Result<Vec<ResourceSet>>;
}

/// A static reference topology: evenly distributes the restricted set
/// across `n` bindings, one cpu and one memory node per binding (memory
/// nodes repeat once exhausted, mirroring a single-NUMA-node node).
#[derive(Debug, Clone)]
pub struct StaticTopologyProvider {
    all_cpus: Vec<u32>,
    all_mems: Vec<u32>,
}

impl StaticTopologyProvider {
    pub fn new(all_cpus: Vec<u32>, all_mems: Vec<u32>) -> Self {
        Self { all_cpus, all_mems }
    }

    /// Discover cpu ids from `/sys/devices/system/cpu/cpuN` entries,
    /// falling back to a single-cpu/single-mem topology if unavailable
    /// (e.g. inside a restricted container at dev time).
    pub fn discover() -> Self {
        let cpus = std::fs::read_dir("/sys/devices/system/cpu")
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter_map(|name| name.strip_prefix("cpu")?.parse::<u32>().ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let cpus = if cpus.is_empty() { vec![0] } else { cpus };
        Self {
            all_cpus: cpus,
            all_mems: vec![0],
        }
    }
}

#[async_trait]
impl TopologyProvider for StaticTopologyProvider {
    async fn info(&self) -> Result<ResourceSet> {
        Ok(ResourceSet {
            cpus: self.all_cpus.clone(),
            mems: self.all_mems.clone(),
        })
    }

    async fn distrib(&self, n: usize, restrict: &ResourceSet) -> Result<Vec<ResourceSet>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let cpu = restrict.cpus.get(i % restrict.cpus.len().max(1)).copied();
            let mem = restrict.mems.get(i % restrict.mems.len().max(1)).copied();
            out.push(ResourceSet {
                cpus: cpu.into_iter().collect(),
                mems: mem.into_iter().collect(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distrib_wraps_around_restricted_set() {
        let topo = StaticTopologyProvider::new(vec![0, 1, 2, 3], vec![0]);
        let restrict = ResourceSet {
            cpus: vec![0, 1],
            mems: vec![0],
        };
        let bindings = topo.distrib(3, &restrict).await.unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[2].cpus, vec![0]);
    }

    #[tokio::test]
    async fn info_reports_the_full_topology() {
        let topo = StaticTopologyProvider::new(vec![0, 1], vec![0, 1]);
        let info = topo.info().await.unwrap();
        assert_eq!(info.cpus, vec![0, 1]);
        assert_eq!(info.mems, vec![0, 1]);
    }
}
