//! Numatopology: per-node NUMA layout reported by the node agent.

use crate::meta::ObjectMeta;
use crate::quantity::ResourceList;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Numatopology {
    /// Cluster-scoped; the name matches the node name.
    pub metadata: ObjectMeta,
    pub spec: NumatopologySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumatopologySpec {
    /// Topology-manager policies in effect on the node.
    #[serde(default)]
    pub policies: HashMap<String, String>,
    /// Per-resource allocatable sets, keyed by resource name.
    #[serde(default)]
    pub numa_res_map: HashMap<String, NumaResEntry>,
    /// CPU id → placement detail.
    #[serde(default)]
    pub cpu_detail: HashMap<String, CpuDetail>,
    /// Resources reserved for the system on this node.
    #[serde(default)]
    pub res_reserved: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumaResEntry {
    #[serde(default)]
    pub capacity: usize,
    /// Allocatable set in cpuset syntax, e.g. `"0-3,8"`.
    #[serde(default)]
    pub allocatable: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuDetail {
    #[serde(default)]
    pub numa_node_id: usize,
    #[serde(default)]
    pub socket_id: usize,
    #[serde(default)]
    pub core_id: usize,
}

impl Numatopology {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
