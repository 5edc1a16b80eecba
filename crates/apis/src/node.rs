//! Node: a schedulable machine as stored in the cluster.

use crate::meta::ObjectMeta;
use crate::quantity::ResourceList;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// An unschedulable node accepts no new tasks.
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub allocatable: ResourceList,
    #[serde(default)]
    pub capacity: ResourceList,
    /// Kubelet-reported readiness.
    #[serde(default = "NodeStatus::default_ready")]
    pub ready: bool,
}

impl NodeStatus {
    fn default_ready() -> bool {
        true
    }
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
