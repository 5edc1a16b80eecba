//! Point-in-time snapshot of the whole cluster.

use crate::job::{JobId, JobInfo};
use crate::namespace::NamespaceInfo;
use crate::node::NodeInfo;
use crate::queue::{QueueId, QueueInfo};
use std::collections::HashMap;
use std::fmt;

/// Immutable deep copy of cache state. Nothing here aliases the cache; a
/// session owns its snapshot outright.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    /// Node names in their arrival order, for deterministic iteration.
    pub node_list: Vec<String>,
    pub queues: HashMap<QueueId, QueueInfo>,
    pub namespace_info: HashMap<String, NamespaceInfo>,
}

/// A member cluster candidate for federated pod-group placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiloClusterInfo {
    pub uid: String,
}

impl fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache:")?;
        for node in self.nodes.values() {
            writeln!(
                f,
                "\t{}: idle({}) used({}) allocatable({}) pods({})",
                node.name,
                node.idle,
                node.used,
                node.allocatable,
                node.tasks.len()
            )?;
        }
        for job in self.jobs.values() {
            writeln!(
                f,
                "\tJob({}) name({}) minAvailable({})",
                job.uid, job.name, job.min_available
            )?;
        }
        Ok(())
    }
}
