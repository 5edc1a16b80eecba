//! Node: scheduler-side accounting for one machine.

use crate::error::DomainError;
use crate::numa::{NumaChangeFlag, NumaTopoInfo};
use crate::resource::Resource;
use crate::task::{allocated_status, TaskId, TaskInfo, TaskStatus};
use gangway_apis as apis;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub phase: NodePhase,
    pub reason: String,
}

impl NodeState {
    pub fn ready() -> Self {
        NodeState {
            phase: NodePhase::Ready,
            reason: String::new(),
        }
    }

    pub fn not_ready(reason: &str) -> Self {
        NodeState {
            phase: NodePhase::NotReady,
            reason: reason.to_string(),
        }
    }
}

/// All scheduler-side information about one node.
///
/// Invariant: `idle = allocatable − Σ res_req(tasks in allocated states)`,
/// with releasing evictees still counted against idle until they are gone.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub node: Option<apis::Node>,

    pub state: NodeState,

    /// Resources of tasks being evicted from this node.
    pub releasing: Resource,
    /// Resources claimed by pipelined tasks against future releases.
    pub pipelined: Resource,
    pub idle: Resource,
    pub used: Resource,
    pub allocatable: Resource,
    pub capability: Resource,

    /// Accounting copies of the tasks placed here, keyed by task UID.
    pub tasks: HashMap<TaskId, TaskInfo>,

    pub numa_info: Option<NumaTopoInfo>,
    pub numa_chg_flag: NumaChangeFlag,

    /// Revocable-zone label of the node, empty when not revocable.
    pub revocable_zone: String,
}

impl NodeInfo {
    /// A placeholder node known only by name, created when tasks arrive
    /// before the node object does.
    pub fn placeholder(name: &str) -> Self {
        NodeInfo {
            name: name.to_string(),
            node: None,
            state: NodeState::not_ready("node not synced"),
            releasing: Resource::empty(),
            pipelined: Resource::empty(),
            idle: Resource::empty(),
            used: Resource::empty(),
            allocatable: Resource::empty(),
            capability: Resource::empty(),
            tasks: HashMap::new(),
            numa_info: None,
            numa_chg_flag: NumaChangeFlag::Reset,
            revocable_zone: String::new(),
        }
    }

    pub fn new(node: &apis::Node) -> Self {
        let mut ni = NodeInfo::placeholder(node.name());
        ni.set_node(node);
        ni
    }

    /// Refresh from the stored node object, recomputing idle resources.
    /// A node whose used resources exceed its allocatable is out of sync.
    pub fn set_node(&mut self, node: &apis::Node) {
        self.name = node.name().to_string();
        self.allocatable = Resource::from_resource_list(&node.status.allocatable);
        self.capability = Resource::from_resource_list(&node.status.capacity);
        self.revocable_zone = node
            .metadata
            .labels
            .get(apis::annotations::REVOCABLE_ZONE_KEY)
            .cloned()
            .unwrap_or_default();

        if !node.status.ready {
            self.state = NodeState::not_ready("NotReady");
        } else if node.spec.unschedulable {
            self.state = NodeState::not_ready("Unschedulable");
        } else if !self.used.less_equal(&self.allocatable) {
            self.state = NodeState::not_ready("OutOfSync");
        } else {
            self.state = NodeState::ready();
        }

        let mut idle = self.allocatable.clone();
        if idle.sub(&self.used).is_err() {
            // Already flagged out of sync above; keep idle floored.
            idle = Resource::empty();
        }
        self.idle = idle;
        self.node = Some(node.clone());
    }

    pub fn ready(&self) -> bool {
        self.state.phase == NodePhase::Ready
    }

    /// Resources that will be idle once releasing tasks are gone, minus
    /// what pipelined tasks have already claimed.
    pub fn future_idle(&self) -> Resource {
        let mut r = self.idle.clone();
        r.add(&self.releasing);
        r.sub_floor(&self.pipelined);
        r
    }

    fn allocate_idle(&mut self, task: &TaskInfo) -> Result<(), DomainError> {
        if !task.res_req.less_equal(&self.idle) {
            let shortfall = task.res_req.fit_delta(&self.idle);
            return Err(DomainError::AllocateFail {
                reason: format!(
                    "task {}/{} requests more than node {} has idle: short of {}",
                    task.namespace, task.name, self.name, shortfall
                ),
            });
        }
        // Checked above.
        let _ = self.idle.sub(&task.res_req);
        Ok(())
    }

    /// Place a task on this node, adjusting resource accounting by its
    /// status. Fails with `AllocateFail` when idle resources are
    /// insufficient, leaving accounting unchanged.
    pub fn add_task(&mut self, task: &TaskInfo) -> Result<(), DomainError> {
        if self.tasks.contains_key(&task.uid) {
            return Err(DomainError::TaskExistsOnNode {
                task: task.uid.clone(),
                node: self.name.clone(),
            });
        }
        if !task.node_name().is_empty() && task.node_name() != self.name {
            return Err(DomainError::AllocateFail {
                reason: format!(
                    "task {}/{} is targeted at node {}, not {}",
                    task.namespace,
                    task.name,
                    task.node_name(),
                    self.name
                ),
            });
        }

        match task.status() {
            TaskStatus::Releasing => {
                self.allocate_idle(task)?;
                self.releasing.add(&task.res_req);
                self.used.add(&task.res_req);
            }
            TaskStatus::Pipelined => {
                // A pipelined task claims resources that are still being
                // released.
                self.pipelined.add(&task.res_req);
            }
            status if allocated_status(status) => {
                self.allocate_idle(task)?;
                self.used.add(&task.res_req);
            }
            _ => {}
        }

        if let Some(numa) = &mut self.numa_info {
            numa.add_task(task);
        }

        self.tasks.insert(task.uid.clone(), task.clone());
        Ok(())
    }

    /// Remove a task, returning its resources to the pools its status held
    /// them in. Accounting uses the stored copy, not the caller's view.
    pub fn remove_task(&mut self, uid: &str) -> Result<TaskInfo, DomainError> {
        let Some(task) = self.tasks.remove(uid) else {
            return Err(DomainError::TaskNotOnNode {
                task: uid.to_string(),
                node: self.name.clone(),
            });
        };

        match task.status() {
            TaskStatus::Releasing => {
                let _ = self.releasing.sub(&task.res_req);
                self.idle.add(&task.res_req);
                let _ = self.used.sub(&task.res_req);
            }
            TaskStatus::Pipelined => {
                let _ = self.pipelined.sub(&task.res_req);
            }
            status if allocated_status(status) => {
                self.idle.add(&task.res_req);
                let _ = self.used.sub(&task.res_req);
            }
            _ => {}
        }

        if let Some(numa) = &mut self.numa_info {
            numa.remove_task(&task);
        }

        Ok(task)
    }

    /// Re-account a task whose status changed: remove the stored copy and
    /// add the caller's view.
    pub fn update_task(&mut self, task: &TaskInfo) -> Result<(), DomainError> {
        self.remove_task(&task.uid)?;
        self.add_task(task)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node ({}): idle <{}>, used <{}>, releasing <{}>, state {:?}",
            self.name, self.idle, self.used, self.releasing, self.state.phase
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInfo;
    use gangway_apis::quantity::build_resource_list;
    use gangway_apis::{Container, ObjectMeta, Pod, PodSpec};

    fn node(cpu: &str, memory: &str) -> NodeInfo {
        NodeInfo::new(&apis::Node {
            metadata: ObjectMeta::cluster_scoped("n1"),
            spec: Default::default(),
            status: apis::NodeStatus {
                allocatable: build_resource_list(cpu, memory),
                capacity: build_resource_list(cpu, memory),
                ready: true,
            },
        })
    }

    fn task(name: &str, cpu: &str, status: TaskStatus) -> TaskInfo {
        let pod = Pod {
            metadata: ObjectMeta::namespaced("default", name),
            spec: PodSpec {
                node_name: "n1".to_string(),
                containers: vec![Container {
                    name: "main".to_string(),
                    requests: build_resource_list(cpu, "1Gi"),
                }],
                ..Default::default()
            },
            status: Default::default(),
        };
        let mut t = TaskInfo::new(&pod);
        t.tx.status = status;
        t
    }

    #[test]
    fn allocated_task_consumes_idle() {
        let mut n = node("4", "8Gi");
        n.add_task(&task("t1", "1", TaskStatus::Allocated)).unwrap();
        assert_eq!(n.idle.milli_cpu, 3000.0);
        assert_eq!(n.used.milli_cpu, 1000.0);
    }

    #[test]
    fn oversized_task_fails_and_leaves_idle_unchanged() {
        let mut n = node("1", "1Gi");
        let before = n.idle.clone();
        let err = n.add_task(&task("t1", "2", TaskStatus::Allocated));
        assert!(matches!(err, Err(DomainError::AllocateFail { .. })));
        assert_eq!(n.idle, before);
        assert!(n.tasks.is_empty());
    }

    #[test]
    fn remove_returns_resources() {
        let mut n = node("4", "8Gi");
        let t = task("t1", "2", TaskStatus::Running);
        n.add_task(&t).unwrap();
        n.remove_task(&t.uid).unwrap();
        assert_eq!(n.idle.milli_cpu, 4000.0);
        assert_eq!(n.used.milli_cpu, 0.0);
    }

    #[test]
    fn releasing_task_feeds_future_idle() {
        let mut n = node("4", "8Gi");
        n.add_task(&task("t1", "3", TaskStatus::Releasing)).unwrap();
        assert_eq!(n.idle.milli_cpu, 1000.0);
        assert_eq!(n.future_idle().milli_cpu, 4000.0);
    }

    #[test]
    fn out_of_sync_node_goes_not_ready() {
        let mut n = node("4", "8Gi");
        n.add_task(&task("t1", "4", TaskStatus::Running)).unwrap();

        // The node shrank below what is already in use.
        let mut small = apis::Node {
            metadata: ObjectMeta::cluster_scoped("n1"),
            spec: Default::default(),
            status: apis::NodeStatus {
                allocatable: build_resource_list("2", "8Gi"),
                capacity: build_resource_list("2", "8Gi"),
                ready: true,
            },
        };
        small.metadata.name = "n1".to_string();
        n.set_node(&small);
        assert_eq!(n.state.phase, NodePhase::NotReady);
        assert_eq!(n.state.reason, "OutOfSync");
    }
}
