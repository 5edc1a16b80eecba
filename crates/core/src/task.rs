//! Task: one schedulable unit, derived from a pod.

use crate::resource::Resource;
use gangway_apis::{annotations, Pod, PodPhase, ResourceList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::DomainError;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Allocated,
    Pipelined,
    Binding,
    Bound,
    Running,
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Whether a status counts as holding node resources.
pub fn allocated_status(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Allocated | TaskStatus::Binding | TaskStatus::Bound | TaskStatus::Running
    )
}

/// Forward transition table. Statuses not listed are terminal.
fn allowed_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Pending => &[Allocated, Pipelined],
        Allocated => &[Pending, Binding, Running, Releasing, Failed],
        Pipelined => &[Pending, Allocated],
        Binding => &[Allocated, Bound, Releasing, Failed],
        Bound => &[Running, Releasing, Succeeded, Failed],
        Running => &[Releasing, Succeeded, Failed],
        Releasing => &[Succeeded, Failed],
        Succeeded | Failed | Unknown => &[],
    }
}

/// Validate a forward status transition against the table.
pub fn validate_status_update(from: TaskStatus, to: TaskStatus) -> Result<(), DomainError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(DomainError::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// The fields a scheduling transaction operates on: target node and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub node_name: String,
    pub status: TaskStatus,
}

/// NUMA placement determined for a task: NUMA id → resource list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskNumaInfo {
    #[serde(default)]
    pub policy: String,
    #[serde(rename = "numa", default)]
    pub res_map: HashMap<usize, ResourceList>,
}

/// All scheduler-side information about one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub uid: TaskId,
    pub job: crate::job::JobId,

    pub name: String,
    pub namespace: String,

    /// Resource request at admission time; empty means best-effort.
    pub init_res_req: Resource,
    pub res_req: Resource,

    pub tx: TransactionContext,
    /// Context of the previous transaction, kept for error reporting.
    pub last_tx: Option<TransactionContext>,

    pub priority: i32,
    pub volume_ready: bool,
    pub preemptable: bool,
    pub best_effort: bool,

    /// Only `""` (cannot use revocable nodes) and `"*"` (may use any
    /// revocable node) are supported in this version.
    pub revocable_zone: String,

    pub numa_info: Option<TaskNumaInfo>,
    pub pod: Pod,
}

fn parse_bool_meta(pod: &Pod, key: &str) -> bool {
    let value = pod.annotation(key).or_else(|| pod.label(key));
    match value {
        Some(v) => v.parse::<bool>().unwrap_or_else(|_| {
            tracing::warn!(key, value = v, "invalid boolean annotation");
            false
        }),
        None => false,
    }
}

fn pod_revocable_zone(pod: &Pod) -> String {
    match pod
        .annotation(annotations::REVOCABLE_ZONE_KEY)
        .or_else(|| pod.label(annotations::REVOCABLE_ZONE_KEY))
    {
        Some("*") => "*".to_string(),
        _ => String::new(),
    }
}

fn pod_numa_info(pod: &Pod) -> Option<TaskNumaInfo> {
    let raw = pod.annotation(annotations::TOPOLOGY_DECISION_KEY)?;
    match serde_json::from_str::<TaskNumaInfo>(raw) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!(pod = %pod.metadata.key(), %err, "malformed topology decision");
            None
        }
    }
}

/// Status of the task derived from its pod's phase.
fn task_status_of(pod: &Pod) -> TaskStatus {
    match pod.status.phase {
        PodPhase::Running => {
            if pod.metadata.deletion_timestamp.is_some() {
                TaskStatus::Releasing
            } else {
                TaskStatus::Running
            }
        }
        PodPhase::Pending => {
            if pod.metadata.deletion_timestamp.is_some() {
                TaskStatus::Releasing
            } else if pod.spec.node_name.is_empty() {
                TaskStatus::Pending
            } else {
                TaskStatus::Bound
            }
        }
        PodPhase::Succeeded => TaskStatus::Succeeded,
        PodPhase::Failed => TaskStatus::Failed,
        PodPhase::Unknown => TaskStatus::Unknown,
    }
}

/// Job identity of a pod: `<namespace>/<group-name>`, empty when the pod
/// carries no group annotation.
pub fn job_id_of(pod: &Pod) -> crate::job::JobId {
    match pod.annotation(annotations::GROUP_NAME_KEY) {
        Some(group) if !group.is_empty() => format!("{}/{}", pod.namespace(), group),
        _ => String::new(),
    }
}

impl TaskInfo {
    pub fn new(pod: &Pod) -> Self {
        let init_res_req = Resource::from_pod_request(pod);
        let res_req = init_res_req.clone();
        let best_effort = init_res_req.is_empty();

        let mut priority = pod.spec.priority.unwrap_or(1);
        if let Some(raw) = pod.annotation(annotations::TASK_PRIORITY_KEY) {
            if let Ok(p) = raw.parse::<i32>() {
                priority = p;
            }
        }

        TaskInfo {
            uid: pod.metadata.uid.clone(),
            job: job_id_of(pod),
            name: pod.name().to_string(),
            namespace: pod.namespace().to_string(),
            init_res_req,
            res_req,
            tx: TransactionContext {
                node_name: pod.spec.node_name.clone(),
                status: task_status_of(pod),
            },
            last_tx: None,
            priority,
            volume_ready: false,
            preemptable: parse_bool_meta(pod, annotations::PREEMPTABLE_KEY),
            best_effort,
            revocable_zone: pod_revocable_zone(pod),
            numa_info: pod_numa_info(pod),
            pod: pod.clone(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.tx.status
    }

    pub fn node_name(&self) -> &str {
        &self.tx.node_name
    }

    /// The task-spec this task was stamped from, if annotated.
    pub fn task_spec_key(&self) -> Option<&str> {
        self.pod
            .annotation(annotations::TASK_SPEC_KEY)
            .filter(|s| !s.is_empty())
    }

    /// Snapshot the current transaction context as the last transaction,
    /// for later scheduling-reason reporting.
    pub fn generate_last_tx_context(&mut self) {
        self.last_tx = Some(self.tx.clone());
    }

    pub fn clear_last_tx_context(&mut self) {
        self.last_tx = None;
    }

    /// Echo the NUMA placement onto the pod so the node agent honors it.
    pub fn set_pod_resource_decision(&mut self) -> Result<(), serde_json::Error> {
        let Some(info) = &self.numa_info else {
            return Ok(());
        };
        if info.res_map.is_empty() {
            return Ok(());
        }
        let layout = serde_json::to_string(info)?;
        self.pod
            .metadata
            .annotations
            .insert(annotations::TOPOLOGY_DECISION_KEY.to_string(), layout);
        Ok(())
    }

    pub fn unset_pod_resource_decision(&mut self) {
        self.pod
            .metadata
            .annotations
            .remove(annotations::TOPOLOGY_DECISION_KEY);
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task ({}:{}/{}): job {}, status {}, pri {}, resreq {}, preemptable {}",
            self.uid,
            self.namespace,
            self.name,
            self.job,
            self.status(),
            self.priority,
            self.res_req,
            self.preemptable,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::quantity::build_resource_list;
    use gangway_apis::{Container, ObjectMeta, PodSpec};

    fn pod_with(requests: ResourceList, annotations_kv: &[(&str, &str)]) -> Pod {
        let mut metadata = ObjectMeta::namespaced("default", "task-0");
        for (k, v) in annotations_kv {
            metadata.annotations.insert(k.to_string(), v.to_string());
        }
        Pod {
            metadata,
            spec: PodSpec {
                scheduler_name: "gangway".to_string(),
                containers: vec![Container {
                    name: "main".to_string(),
                    requests,
                }],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    #[test]
    fn best_effort_follows_empty_request() {
        let task = TaskInfo::new(&pod_with(ResourceList::new(), &[]));
        assert!(task.best_effort);

        let task = TaskInfo::new(&pod_with(build_resource_list("1", "1Gi"), &[]));
        assert!(!task.best_effort);
    }

    #[test]
    fn priority_annotation_overrides_spec() {
        let mut pod = pod_with(
            build_resource_list("1", "1Gi"),
            &[(annotations::TASK_PRIORITY_KEY, "42")],
        );
        pod.spec.priority = Some(7);
        assert_eq!(TaskInfo::new(&pod).priority, 42);
    }

    #[test]
    fn revocable_zone_accepts_only_star() {
        let task = TaskInfo::new(&pod_with(
            ResourceList::new(),
            &[(annotations::REVOCABLE_ZONE_KEY, "*")],
        ));
        assert_eq!(task.revocable_zone, "*");

        let task = TaskInfo::new(&pod_with(
            ResourceList::new(),
            &[(annotations::REVOCABLE_ZONE_KEY, "zone-a")],
        ));
        assert_eq!(task.revocable_zone, "");
    }

    #[test]
    fn transition_table_matches_reverse_law() {
        use TaskStatus::*;
        let statuses = [
            Pending, Allocated, Pipelined, Binding, Bound, Running, Releasing, Succeeded, Failed,
        ];
        for &from in &statuses {
            for &to in &statuses {
                if validate_status_update(from, to).is_ok() {
                    // The reverse edge must either fail or itself be a
                    // legal forward edge.
                    let reverse = validate_status_update(to, from);
                    assert!(
                        reverse.is_err() || allowed_transitions(to).contains(&from),
                        "inconsistent reverse edge {to:?} -> {from:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(validate_status_update(TaskStatus::Succeeded, TaskStatus::Pending).is_err());
        assert!(validate_status_update(TaskStatus::Failed, TaskStatus::Running).is_err());
    }
}
