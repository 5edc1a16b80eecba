//! PriorityClass: named priority values for pods and pod-groups.

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityClass {
    pub metadata: ObjectMeta,
    pub value: i32,
    #[serde(default)]
    pub global_default: bool,
}

/// Priority classes whose members are never eviction victims.
pub const SYSTEM_CLUSTER_CRITICAL: &str = "system-cluster-critical";
pub const SYSTEM_NODE_CRITICAL: &str = "system-node-critical";

/// Namespace hosting system workloads, exempt from eviction.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

impl PriorityClass {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
