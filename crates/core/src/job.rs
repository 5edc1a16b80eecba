//! Job: the scheduler-side view of a pod-group and its tasks.

use crate::error::DomainError;
use crate::fit_error::FitErrors;
use crate::queue::QueueId;
use crate::resource::Resource;
use crate::task::{allocated_status, validate_status_update, TaskId, TaskInfo, TaskStatus};
use crate::task::TransactionContext;
use chrono::{DateTime, Utc};
use gangway_apis::{annotations, PodGroup, PodGroupPhase};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Identity of a job: `<namespace>/<pod-group-name>`.
pub type JobId = String;

/// Pod condition reasons surfaced through task scheduling messages.
pub const POD_REASON_UNSCHEDULABLE: &str = "Unschedulable";
pub const POD_REASON_SCHEDULABLE: &str = "Schedulable";
pub const POD_REASON_UNDETERMINED: &str = "Undetermined";

/// Disruption budget expressed over the job's pods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisruptionBudget {
    pub min_available: String,
    pub max_unavailable: String,
}

impl DisruptionBudget {
    pub fn new(min_available: &str, max_unavailable: &str) -> Self {
        DisruptionBudget {
            min_available: min_available.to_string(),
            max_unavailable: max_unavailable.to_string(),
        }
    }
}

/// Parse a duration string of the form `1h30m`, `90s`, `250ms`.
fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();
    let mut any = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            continue;
        }
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                'h' => "h",
                'm' => "m",
                's' => "s",
                _ => return None,
            }
        };
        let value: f64 = digits.parse().ok()?;
        digits.clear();
        let secs = match unit {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            _ => value / 1000.0,
        };
        total += Duration::from_secs_f64(secs);
        any = true;
    }

    if !any || !digits.is_empty() {
        return None;
    }
    Some(total)
}

/// All scheduler-side information about one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobInfo {
    pub uid: JobId,

    pub name: String,
    pub namespace: String,

    pub queue: QueueId,
    pub priority: i32,
    pub min_available: i32,
    /// Maximum time the job may wait pending under its SLA.
    pub waiting_time: Option<Duration>,

    pub job_fit_errors: String,
    pub nodes_fit_errors: HashMap<TaskId, FitErrors>,

    pub tasks: HashMap<TaskId, TaskInfo>,
    task_status_index: HashMap<TaskStatus, HashSet<TaskId>>,
    pub task_min_available: HashMap<String, i32>,
    pub task_min_available_total: i32,

    /// Resources held by tasks in allocated states.
    pub allocated: Resource,
    /// Resources requested by all tasks.
    pub total_request: Resource,

    pub creation_timestamp: DateTime<Utc>,
    pub pod_group: Option<PodGroup>,
    pub schedule_start_timestamp: Option<DateTime<Utc>>,

    pub preemptable: bool,
    pub revocable_zone: String,
    pub budget: DisruptionBudget,
}

impl JobInfo {
    pub fn new(uid: &str) -> Self {
        JobInfo {
            uid: uid.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tasks(uid: &str, tasks: Vec<TaskInfo>) -> Self {
        let mut job = JobInfo::new(uid);
        for task in tasks {
            job.add_task_info(task);
        }
        job
    }

    /// Attach pod-group details: identity, gang constraints, and the
    /// scheduling policy knobs carried by annotations and labels.
    pub fn set_pod_group(&mut self, pg: PodGroup) {
        self.name = pg.name().to_string();
        self.namespace = pg.namespace().to_string();
        self.min_available = pg.spec.min_member;
        self.queue = pg.spec.queue.clone();
        self.creation_timestamp = pg.metadata.creation_timestamp;

        self.waiting_time = self.extract_waiting_time(&pg);
        self.preemptable = Self::extract_preemptable(&pg);
        self.revocable_zone = Self::extract_revocable_zone(&pg);
        self.budget = Self::extract_budget(&pg);

        let mut total = 0;
        self.task_min_available.clear();
        for (task, member) in &pg.spec.min_task_member {
            self.task_min_available.insert(task.clone(), *member);
            total += member;
        }
        self.task_min_available_total = total;

        self.pod_group = Some(pg);
    }

    pub fn unset_pod_group(&mut self) {
        self.pod_group = None;
    }

    fn extract_waiting_time(&self, pg: &PodGroup) -> Option<Duration> {
        let raw = pg.annotation(annotations::SLA_WAITING_TIME_KEY)?;
        match parse_duration(raw) {
            Some(d) if !d.is_zero() => Some(d),
            _ => {
                tracing::warn!(
                    job = %self.uid,
                    value = raw,
                    "invalid sla waiting time, ignoring"
                );
                None
            }
        }
    }

    fn extract_preemptable(pg: &PodGroup) -> bool {
        let value = pg
            .annotation(annotations::PREEMPTABLE_KEY)
            .or_else(|| pg.label(annotations::PREEMPTABLE_KEY));
        match value {
            Some(v) => v.parse::<bool>().unwrap_or_else(|_| {
                tracing::warn!(value = v, "invalid preemptable marker");
                false
            }),
            None => false,
        }
    }

    fn extract_revocable_zone(pg: &PodGroup) -> String {
        if let Some(value) = pg.annotation(annotations::REVOCABLE_ZONE_KEY) {
            return if value == "*" {
                "*".to_string()
            } else {
                String::new()
            };
        }
        // A preemptable group may also run in revocable zones.
        if let Some(value) = pg.annotation(annotations::PREEMPTABLE_KEY) {
            if value.parse::<bool>().unwrap_or(false) {
                return "*".to_string();
            }
        }
        String::new()
    }

    fn extract_budget(pg: &PodGroup) -> DisruptionBudget {
        if let Some(value) = pg.annotation(annotations::JDB_MIN_AVAILABLE_KEY) {
            return DisruptionBudget::new(value, "");
        }
        if let Some(value) = pg.annotation(annotations::JDB_MAX_UNAVAILABLE_KEY) {
            return DisruptionBudget::new("", value);
        }
        DisruptionBudget::default()
    }

    /// Minimum resources of the pod-group, empty when unset.
    pub fn min_resources(&self) -> Resource {
        self.pod_group
            .as_ref()
            .and_then(|pg| pg.spec.min_resources.as_ref())
            .map(Resource::from_resource_list)
            .unwrap_or_default()
    }

    fn index_task(&mut self, uid: &str, status: TaskStatus) {
        self.task_status_index
            .entry(status)
            .or_default()
            .insert(uid.to_string());
    }

    fn unindex_task(&mut self, uid: &str, status: TaskStatus) {
        if let Some(set) = self.task_status_index.get_mut(&status) {
            set.remove(uid);
            if set.is_empty() {
                self.task_status_index.remove(&status);
            }
        }
    }

    /// Add a task, updating aggregates and the status index.
    pub fn add_task_info(&mut self, task: TaskInfo) {
        self.total_request.add(&task.res_req);
        if allocated_status(task.status()) {
            self.allocated.add(&task.res_req);
        }
        self.index_task(&task.uid.clone(), task.status());
        self.tasks.insert(task.uid.clone(), task);
    }

    /// Remove a task, updating aggregates and the status index.
    pub fn delete_task_info(&mut self, uid: &str) -> Result<TaskInfo, DomainError> {
        let Some(task) = self.tasks.remove(uid) else {
            return Err(DomainError::TaskNotFound {
                task: uid.to_string(),
                job: self.uid.clone(),
            });
        };
        // Aggregates never drop below zero on consistent books.
        let _ = self.total_request.sub(&task.res_req);
        if allocated_status(task.status()) {
            let _ = self.allocated.sub(&task.res_req);
        }
        self.unindex_task(uid, task.status());
        Ok(task)
    }

    /// Update a task's status through the forward transition table. On
    /// error both the task and the job are left in their original state.
    pub fn update_task_status(&mut self, uid: &str, status: TaskStatus) -> Result<(), DomainError> {
        let current = match self.tasks.get(uid) {
            Some(task) => task.status(),
            None => {
                return Err(DomainError::TaskNotFound {
                    task: uid.to_string(),
                    job: self.uid.clone(),
                })
            }
        };
        validate_status_update(current, status)?;

        let mut task = self.delete_task_info(uid)?;
        task.tx.status = status;
        self.add_task_info(task);
        Ok(())
    }

    /// Restore a journaled transaction context verbatim, bypassing the
    /// transition table. Only statement rollback uses this.
    pub fn restore_task_context(
        &mut self,
        uid: &str,
        ctx: TransactionContext,
    ) -> Result<(), DomainError> {
        let mut task = self.delete_task_info(uid)?;
        task.tx = ctx;
        self.add_task_info(task);
        Ok(())
    }

    /// Tasks currently in `status`, in no particular order.
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<&TaskInfo> {
        self.task_status_index
            .get(&status)
            .map(|set| set.iter().filter_map(|uid| self.tasks.get(uid)).collect())
            .unwrap_or_default()
    }

    pub fn count_in(&self, status: TaskStatus) -> usize {
        self.task_status_index
            .get(&status)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Whether the job has not yet been admitted into its queue.
    pub fn is_pending(&self) -> bool {
        match &self.pod_group {
            Some(pg) => pg.status.phase == PodGroupPhase::Pending,
            None => true,
        }
    }

    /// Number of tasks that hold (or will trivially obtain) a place:
    /// allocated-status tasks, succeeded tasks, and best-effort pending
    /// tasks.
    pub fn ready_task_num(&self) -> i32 {
        let mut occupied = self.count_in(TaskStatus::Bound)
            + self.count_in(TaskStatus::Binding)
            + self.count_in(TaskStatus::Running)
            + self.count_in(TaskStatus::Allocated)
            + self.count_in(TaskStatus::Succeeded);

        occupied += self
            .tasks_in(TaskStatus::Pending)
            .iter()
            .filter(|t| t.best_effort)
            .count();

        occupied as i32
    }

    /// Number of tasks waiting on resources yet to be released.
    pub fn waiting_task_num(&self) -> i32 {
        self.count_in(TaskStatus::Pipelined) as i32
    }

    /// Number of tasks in any schedulable or scheduled state.
    pub fn valid_task_num(&self) -> i32 {
        self.task_status_index
            .iter()
            .filter(|(status, _)| {
                allocated_status(**status)
                    || matches!(
                        **status,
                        TaskStatus::Succeeded | TaskStatus::Pipelined | TaskStatus::Pending
                    )
            })
            .map(|(_, set)| set.len())
            .sum::<usize>() as i32
    }

    /// Whether enough members are placed for the gang to run.
    pub fn ready(&self) -> bool {
        self.ready_task_num() >= self.min_available
    }

    fn occupied_by_task_spec(&self, include: impl Fn(TaskStatus, &TaskInfo) -> bool) -> HashMap<String, i32> {
        let mut occupied: HashMap<String, i32> = HashMap::new();
        for task in self.tasks.values() {
            if include(task.status(), task) {
                if let Some(key) = task.task_spec_key() {
                    *occupied.entry(key.to_string()).or_insert(0) += 1;
                }
            }
        }
        occupied
    }

    fn meets_task_min_available(&self, occupied: &HashMap<String, i32>) -> bool {
        for (task, min) in &self.task_min_available {
            if occupied.get(task).copied().unwrap_or(0) < *min {
                tracing::debug!(
                    job = %self.uid,
                    task,
                    occupied = occupied.get(task).copied().unwrap_or(0),
                    min,
                    "task below its per-task minimum"
                );
                return false;
            }
        }
        true
    }

    /// Whether per-task minimums are satisfiable by the tasks currently in
    /// valid states. Trivially true when the joint per-task minimums exceed
    /// the job minimum (they cannot be enforced together).
    pub fn check_task_min_available(&self) -> bool {
        if self.min_available < self.task_min_available_total {
            return true;
        }
        let occupied = self.occupied_by_task_spec(|status, _| {
            allocated_status(status)
                || matches!(
                    status,
                    TaskStatus::Succeeded | TaskStatus::Pipelined | TaskStatus::Pending
                )
        });
        self.meets_task_min_available(&occupied)
    }

    /// Per-task minimums over ready members only.
    pub fn check_task_min_available_ready(&self) -> bool {
        if self.min_available < self.task_min_available_total {
            return true;
        }
        let occupied = self.occupied_by_task_spec(|status, task| {
            allocated_status(status)
                || status == TaskStatus::Succeeded
                || (status == TaskStatus::Pending && task.init_res_req.is_empty())
        });
        self.meets_task_min_available(&occupied)
    }

    /// Per-task minimums counting pipelined members as placed.
    pub fn check_task_min_available_pipelined(&self) -> bool {
        if self.min_available < self.task_min_available_total {
            return true;
        }
        let occupied = self.occupied_by_task_spec(|status, task| {
            allocated_status(status)
                || matches!(status, TaskStatus::Succeeded | TaskStatus::Pipelined)
                || (status == TaskStatus::Pending && task.init_res_req.is_empty())
        });
        self.meets_task_min_available(&occupied)
    }

    /// Detailed reason and message for a task, based on its last
    /// scheduling transaction.
    pub fn task_scheduling_reason(&self, uid: &str) -> (String, String) {
        let Some(task) = self.tasks.get(uid) else {
            return (String::new(), String::new());
        };

        let ctx = task.last_tx.as_ref().unwrap_or(&task.tx);
        match ctx.status {
            TaskStatus::Allocated | TaskStatus::Pipelined => {
                let mut msg = format!(
                    "Pod {}/{} can possibly be assigned to {}",
                    task.namespace, task.name, ctx.node_name
                );
                if ctx.status == TaskStatus::Pipelined {
                    msg.push_str(" once resource is released");
                }
                (POD_REASON_SCHEDULABLE.to_string(), msg)
            }
            TaskStatus::Pending => {
                if let Some(fit_errors) = self.nodes_fit_errors.get(uid) {
                    (POD_REASON_UNSCHEDULABLE.to_string(), fit_errors.error())
                } else {
                    (
                        POD_REASON_UNDETERMINED.to_string(),
                        self.job_fit_errors.clone(),
                    )
                }
            }
            status => (status.to_string(), self.job_fit_errors.clone()),
        }
    }

    /// Summary of why the job's tasks failed to fit, as a sorted histogram
    /// over the status index followed by pending-task reasons.
    pub fn fit_error(&self) -> String {
        let mut reasons: HashMap<String, usize> = HashMap::new();
        for (status, set) in &self.task_status_index {
            *reasons.entry(status.to_string()).or_insert(0) += set.len();
        }
        reasons.insert("minAvailable".to_string(), self.min_available as usize);

        let sorted = |m: HashMap<String, usize>| {
            let mut parts: Vec<String> =
                m.into_iter().map(|(k, v)| format!("{} {}", v, k)).collect();
            parts.sort();
            parts.join(", ")
        };

        let mut msg = format!("pod group is not ready, {}", sorted(reasons));

        let mut pending_reasons: HashMap<String, usize> = HashMap::new();
        for task in self.tasks_in(TaskStatus::Pending) {
            let (reason, _) = self.task_scheduling_reason(&task.uid);
            *pending_reasons.entry(reason).or_insert(0) += 1;
        }
        if !pending_reasons.is_empty() {
            msg.push_str(&format!("; Pending: {}", sorted(pending_reasons)));
        }

        msg
    }
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job ({}): namespace {} (queue {}), name {}, minAvailable {}, preemptable {}",
            self.uid, self.namespace, self.queue, self.name, self.min_available, self.preemptable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::quantity::build_resource_list;
    use gangway_apis::{Container, ObjectMeta, Pod, PodGroupSpec, PodSpec};

    fn task(name: &str, cpu: &str, status: TaskStatus) -> TaskInfo {
        let pod = Pod {
            metadata: ObjectMeta::namespaced("default", name),
            spec: PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    requests: build_resource_list(cpu, "1Gi"),
                }],
                ..Default::default()
            },
            status: Default::default(),
        };
        let mut t = TaskInfo::new(&pod);
        t.job = "default/group-1".to_string();
        t.tx.status = status;
        t
    }

    fn pod_group(min_member: i32) -> PodGroup {
        PodGroup {
            metadata: ObjectMeta::namespaced("default", "group-1"),
            spec: PodGroupSpec {
                min_member,
                queue: "q1".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    #[test]
    fn aggregates_follow_task_membership() {
        let mut job = JobInfo::new("default/group-1");
        let t1 = task("t1", "1", TaskStatus::Pending);
        let t2 = task("t2", "2", TaskStatus::Running);
        let t1_uid = t1.uid.clone();

        job.add_task_info(t1);
        job.add_task_info(t2);
        assert_eq!(job.total_request.milli_cpu, 3000.0);
        assert_eq!(job.allocated.milli_cpu, 2000.0);

        job.delete_task_info(&t1_uid).unwrap();
        assert_eq!(job.total_request.milli_cpu, 2000.0);
        assert_eq!(job.allocated.milli_cpu, 2000.0);
    }

    #[test]
    fn ready_counts_allocated_and_best_effort_pending() {
        let mut job = JobInfo::new("default/group-1");
        job.set_pod_group(pod_group(2));

        job.add_task_info(task("t1", "1", TaskStatus::Bound));
        assert!(!job.ready());

        // A best-effort pending task counts toward readiness.
        let pod = Pod {
            metadata: ObjectMeta::namespaced("default", "t2"),
            spec: Default::default(),
            status: Default::default(),
        };
        job.add_task_info(TaskInfo::new(&pod));
        assert!(job.ready());
    }

    #[test]
    fn update_task_status_rejects_invalid_transitions() {
        let mut job = JobInfo::new("default/group-1");
        let t = task("t1", "1", TaskStatus::Pending);
        let uid = t.uid.clone();
        job.add_task_info(t);

        assert!(job.update_task_status(&uid, TaskStatus::Running).is_err());
        assert_eq!(job.tasks[&uid].status(), TaskStatus::Pending);
        assert_eq!(job.allocated.milli_cpu, 0.0);

        job.update_task_status(&uid, TaskStatus::Allocated).unwrap();
        assert_eq!(job.allocated.milli_cpu, 1000.0);
    }

    #[test]
    fn clone_is_a_fixpoint_of_accessors() {
        let mut job = JobInfo::new("default/group-1");
        job.set_pod_group(pod_group(1));
        job.add_task_info(task("t1", "1", TaskStatus::Running));
        job.add_task_info(task("t2", "1", TaskStatus::Pending));

        let clone = job.clone();
        assert_eq!(clone.ready_task_num(), job.ready_task_num());
        assert_eq!(clone.valid_task_num(), job.valid_task_num());
        assert_eq!(clone.total_request, job.total_request);
        assert_eq!(clone.allocated, job.allocated);
        assert_eq!(clone.fit_error(), job.fit_error());
        assert_eq!(clone, job);
    }

    #[test]
    fn sla_waiting_time_parses_go_style_durations() {
        let mut pg = pod_group(1);
        pg.metadata.annotations.insert(
            annotations::SLA_WAITING_TIME_KEY.to_string(),
            "1h30m".to_string(),
        );
        let mut job = JobInfo::new("default/group-1");
        job.set_pod_group(pg);
        assert_eq!(job.waiting_time, Some(Duration::from_secs(5400)));

        let mut pg = pod_group(1);
        pg.metadata.annotations.insert(
            annotations::SLA_WAITING_TIME_KEY.to_string(),
            "soon".to_string(),
        );
        job.set_pod_group(pg);
        assert_eq!(job.waiting_time, None);
    }

    #[test]
    fn per_task_minimums_gate_validity() {
        let mut pg = pod_group(4);
        pg.spec.min_task_member.insert("workers".to_string(), 2);
        let mut job = JobInfo::new("default/group-1");
        job.set_pod_group(pg);

        let mut t = task("t1", "1", TaskStatus::Pending);
        t.pod.metadata.annotations.insert(
            annotations::TASK_SPEC_KEY.to_string(),
            "workers".to_string(),
        );
        job.add_task_info(t);

        // Only one of the two required workers exists.
        assert!(!job.check_task_min_available());
    }
}
