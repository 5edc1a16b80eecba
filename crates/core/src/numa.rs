//! NUMA topology bookkeeping for nodes.

use crate::cpuset::CpuSet;
use crate::task::TaskInfo;
use gangway_apis::{parse_quantity, Numatopology, ResourceList};
use std::collections::HashMap;

/// How a node's NUMA-allocatable changed relative to the previous report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumaChangeFlag {
    /// No topology information, or it was removed.
    Reset,
    /// At least one resource did not shrink.
    More,
    /// Every resource shrank.
    Less,
}

/// Allocatable information for one resource across NUMA nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumaResourceInfo {
    pub capacity: usize,
    pub allocatable: CpuSet,
    /// NUMA id → allocatable amount.
    pub allocatable_per_numa: HashMap<usize, f64>,
    /// NUMA id → amount in use.
    pub used_per_numa: HashMap<usize, f64>,
}

/// Per-resource idle cpusets, keyed by resource name.
pub type ResNumaSets = HashMap<String, CpuSet>;

/// Topology-manager information about one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumaTopoInfo {
    pub name: String,
    pub policies: HashMap<String, String>,
    pub numa_res: HashMap<String, NumaResourceInfo>,
    /// CPU id → NUMA node id.
    pub cpu_to_numa: HashMap<usize, usize>,
    pub res_reserved: HashMap<String, f64>,
}

impl NumaTopoInfo {
    /// Build from the stored topology object.
    pub fn from_object(obj: &Numatopology) -> Self {
        let mut info = NumaTopoInfo {
            name: obj.name().to_string(),
            policies: obj.spec.policies.clone(),
            ..Default::default()
        };

        for (res_name, entry) in &obj.spec.numa_res_map {
            info.numa_res.insert(
                res_name.clone(),
                NumaResourceInfo {
                    capacity: entry.capacity,
                    allocatable: CpuSet::parse(&entry.allocatable),
                    ..Default::default()
                },
            );
        }

        for (cpu, detail) in &obj.spec.cpu_detail {
            if let Ok(cpu_id) = cpu.parse::<usize>() {
                info.cpu_to_numa.insert(cpu_id, detail.numa_node_id);
            }
        }

        info.res_reserved = parse_reserved(&obj.spec.res_reserved);
        info
    }

    /// Whether at least one resource did not shrink in `new_info`.
    pub fn compare(&self, new_info: &NumaTopoInfo) -> bool {
        for (res_name, res) in &self.numa_res {
            let old_size = res.allocatable.len();
            let new_size = new_info
                .numa_res
                .get(res_name)
                .map(|r| r.allocatable.len())
                .unwrap_or(0);
            if old_size <= new_size {
                return true;
            }
        }
        false
    }

    /// Remove allocated sets from the node's allocatable.
    pub fn allocate(&mut self, sets: &ResNumaSets) {
        for (res_name, set) in sets {
            if let Some(res) = self.numa_res.get_mut(res_name) {
                res.allocatable = res.allocatable.difference(set);
            }
        }
    }

    /// Return previously allocated sets to the node's allocatable.
    pub fn release(&mut self, sets: &ResNumaSets) {
        for (res_name, set) in sets {
            if let Some(res) = self.numa_res.get_mut(res_name) {
                res.allocatable = res.allocatable.union(set);
            }
        }
    }

    /// Account a task's NUMA decision against used-per-NUMA.
    pub fn add_task(&mut self, task: &TaskInfo) {
        self.apply_decision(task, 1.0);
    }

    pub fn remove_task(&mut self, task: &TaskInfo) {
        self.apply_decision(task, -1.0);
    }

    fn apply_decision(&mut self, task: &TaskInfo, sign: f64) {
        let Some(numa) = &task.numa_info else {
            return;
        };
        for (numa_id, res_list) in &numa.res_map {
            for (res_name, quantity) in res_list {
                let Ok(value) = parse_quantity(quantity) else {
                    continue;
                };
                let value = if res_name == "cpu" { value * 1000.0 } else { value };
                if let Some(res) = self.numa_res.get_mut(res_name) {
                    let used = res.used_per_numa.entry(*numa_id).or_insert(0.0);
                    *used = (*used + sign * value).max(0.0);
                }
            }
        }
    }

    /// Idle cpusets per resource, for handing to hint providers.
    pub fn idle_sets(&self) -> ResNumaSets {
        self.numa_res
            .iter()
            .map(|(name, res)| (name.clone(), res.allocatable.clone()))
            .collect()
    }
}

fn parse_reserved(list: &ResourceList) -> HashMap<String, f64> {
    let mut reserved = HashMap::new();
    for (name, quantity) in list {
        match parse_quantity(quantity) {
            Ok(v) => {
                reserved.insert(name.clone(), v);
            }
            Err(err) => {
                tracing::warn!(resource = %name, %err, "malformed reserved quantity");
            }
        }
    }
    reserved
}

/// Idle NUMA sets of every node that reports topology, keyed by node name.
pub fn generate_node_res_numa_sets<'a>(
    nodes: impl Iterator<Item = &'a crate::node::NodeInfo>,
) -> HashMap<String, ResNumaSets> {
    let mut sets = HashMap::new();
    for node in nodes {
        if let Some(numa) = &node.numa_info {
            sets.insert(node.name.clone(), numa.idle_sets());
        }
    }
    sets
}

/// Allocate task sets out of a node's idle sets.
pub fn allocate_sets(node_sets: &mut ResNumaSets, task_sets: &ResNumaSets) {
    for (res_name, set) in task_sets {
        if let Some(existing) = node_sets.get_mut(res_name) {
            *existing = existing.difference(set);
        }
    }
}

/// Release task sets back into a node's idle sets.
pub fn release_sets(node_sets: &mut ResNumaSets, task_sets: &ResNumaSets) {
    for (res_name, set) in task_sets {
        if let Some(existing) = node_sets.get_mut(res_name) {
            *existing = existing.union(set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::{NumaResEntry, NumatopologySpec, ObjectMeta};

    fn topo(allocatable: &str) -> Numatopology {
        let mut spec = NumatopologySpec::default();
        spec.numa_res_map.insert(
            "cpu".to_string(),
            NumaResEntry {
                capacity: 8,
                allocatable: allocatable.to_string(),
            },
        );
        Numatopology {
            metadata: ObjectMeta::cluster_scoped("n1"),
            spec,
        }
    }

    #[test]
    fn compare_detects_shrinkage() {
        let old = NumaTopoInfo::from_object(&topo("0-7"));
        let grown = NumaTopoInfo::from_object(&topo("0-7"));
        let shrunk = NumaTopoInfo::from_object(&topo("0-3"));

        assert!(old.compare(&grown));
        assert!(!old.compare(&shrunk));
    }

    #[test]
    fn allocate_and_release_round_trip() {
        let mut info = NumaTopoInfo::from_object(&topo("0-7"));
        let mut sets = ResNumaSets::new();
        sets.insert("cpu".to_string(), CpuSet::parse("0-1"));

        info.allocate(&sets);
        assert_eq!(info.numa_res["cpu"].allocatable.to_string(), "2-7");
        info.release(&sets);
        assert_eq!(info.numa_res["cpu"].allocatable.to_string(), "0-7");
    }
}
