//! Tracks free CPU and memory-node ids on the node and allocates them to
//! containers under the asymmetric policy: CPUs are an exclusive
//! all-or-nothing prefix take, memory nodes fall back to a shared
//! last-resort allocation once only one is left free.

use crate::types::{ContainerId, Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cpus: usize,
    pub mems: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    pub cpus: Vec<u32>,
    pub mems: Vec<u32>,
}

#[derive(Debug)]
pub struct ResourceManager {
    free_cpus: Vec<u32>,
    free_mems: Vec<u32>,
    allocations: HashMap<ContainerId, ResourceSet>,
}

impl ResourceManager {
    pub fn new(all_cpus: Vec<u32>, all_mems: Vec<u32>) -> Self {
        Self {
            free_cpus: all_cpus,
            free_mems: all_mems,
            allocations: HashMap::new(),
        }
    }

    /// Allocate resources for `uuid`. CPUs: if fewer than `request.cpus`
    /// are free, the request degrades to every free CPU rather than
    /// failing outright — the caller (registry) is responsible for
    /// treating a short allocation as `ResourceExhausted` if it cannot
    /// proceed with fewer CPUs than asked. Memories: the last free memory
    /// node is never exclusively claimed, it is handed out to every
    /// requester once the pool is down to one.
    pub fn schedule(&mut self, uuid: &ContainerId, request: &ResourceRequest) -> ResourceSet {
        let (ret_cpus, avail_cpus) = if self.free_cpus.len() >= request.cpus {
            let (taken, rest) = self.free_cpus.split_at(request.cpus);
            (taken.to_vec(), rest.to_vec())
        } else {
            (Vec::new(), self.free_cpus.clone())
        };

        let (ret_mems, avail_mems) = if self.free_mems.len() > 1 {
            let take = request.mems.min(self.free_mems.len());
            let (taken, rest) = self.free_mems.split_at(take);
            (taken.to_vec(), rest.to_vec())
        } else {
            (self.free_mems.clone(), self.free_mems.clone())
        };

        self.free_cpus = avail_cpus;
        self.free_mems = avail_mems;

        let set = ResourceSet {
            cpus: ret_cpus,
            mems: ret_mems,
        };
        self.allocations.insert(uuid.clone(), set.clone());
        set
    }

    /// Return a container's allocation to the free pool. Releasing a
    /// memory-node set that was shared (last-resort allocation) is safe:
    /// those ids are already present in `free_mems`, so re-adding them is
    /// deduplicated.
    pub fn release(&mut self, uuid: &ContainerId) -> Result<()> {
        let set = self
            .allocations
            .remove(uuid)
            .ok_or_else(|| Error::unknown_container(uuid.to_string()))?;

        for cpu in set.cpus {
            if !self.free_cpus.contains(&cpu) {
                self.free_cpus.push(cpu);
            }
        }
        for mem in set.mems {
            if !self.free_mems.contains(&mem) {
                self.free_mems.push(mem);
            }
        }
        Ok(())
    }

    pub fn free_cpus(&self) -> &[u32] {
        &self.free_cpus
    }

    pub fn free_mems(&self) -> &[u32] {
        &self.free_mems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ResourceManager {
        ResourceManager::new(vec![0, 1, 2, 3], vec![0, 1])
    }

    #[test]
    fn exclusive_cpu_prefix_take() {
        let mut mgr = manager();
        let uuid = ContainerId::new();
        let set = mgr.schedule(&uuid, &ResourceRequest { cpus: 2, mems: 1 });
        assert_eq!(set.cpus, vec![0, 1]);
        assert_eq!(mgr.free_cpus(), &[2, 3]);
    }

    #[test]
    fn short_cpu_request_degrades_to_all_free() {
        let mut mgr = manager();
        let uuid = ContainerId::new();
        let set = mgr.schedule(&uuid, &ResourceRequest { cpus: 10, mems: 1 });
        assert_eq!(set.cpus, vec![0, 1, 2, 3]);
        assert!(mgr.free_cpus().is_empty());
    }

    #[test]
    fn last_memory_node_is_shared_not_exclusive() {
        let mut mgr = ResourceManager::new(vec![0, 1], vec![0]);
        let a = ContainerId::new();
        let b = ContainerId::new();
        let set_a = mgr.schedule(&a, &ResourceRequest { cpus: 1, mems: 1 });
        let set_b = mgr.schedule(&b, &ResourceRequest { cpus: 1, mems: 1 });
        assert_eq!(set_a.mems, vec![0]);
        assert_eq!(set_b.mems, vec![0]);
        assert_eq!(mgr.free_mems(), &[0]);
    }

    #[test]
    fn schedule_then_release_restores_free_pool() {
        let mut mgr = manager();
        let uuid = ContainerId::new();
        mgr.schedule(&uuid, &ResourceRequest { cpus: 2, mems: 1 });
        mgr.release(&uuid).unwrap();
        let mut cpus = mgr.free_cpus().to_vec();
        cpus.sort();
        assert_eq!(cpus, vec![0, 1, 2, 3]);
    }

    #[test]
    fn release_of_unknown_container_is_an_error() {
        let mut mgr = manager();
        assert!(mgr.release(&ContainerId::new()).is_err());
    }
}
