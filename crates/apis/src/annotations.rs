//! Annotation and label keys the scheduler and controllers consume.

/// Group prefix for all gangway annotations and labels.
pub const GROUP: &str = "gangway.sh";

/// Task name annotation on a pod, naming the task-spec it was created from.
pub const TASK_SPEC_KEY: &str = "gangway.sh/task-spec";

/// Job name annotation on a pod.
pub const JOB_NAME_KEY: &str = "gangway.sh/job-name";

/// Pod-group name annotation on a pod.
pub const GROUP_NAME_KEY: &str = "gangway.sh/group-name";

/// Per-task priority override on a pod.
pub const TASK_PRIORITY_KEY: &str = "gangway.sh/task-priority";

/// Marks a pod or pod-group as preemptable.
pub const PREEMPTABLE_KEY: &str = "gangway.sh/preemptable";

/// Revocable-zone opt-in on a pod or pod-group. Only `""` and `"*"` are
/// recognized in this version.
pub const REVOCABLE_ZONE_KEY: &str = "gangway.sh/revocable-zone";

/// Disruption budget: minimum available expression.
pub const JDB_MIN_AVAILABLE_KEY: &str = "gangway.sh/jdb-min-available";

/// Disruption budget: maximum unavailable expression.
pub const JDB_MAX_UNAVAILABLE_KEY: &str = "gangway.sh/jdb-max-unavailable";

/// Serialized NUMA placement echoed back to the node agent.
pub const TOPOLOGY_DECISION_KEY: &str = "gangway.sh/topology-decision";

/// Maximum waiting time a job may stay pending under its service level
/// agreement; once exceeded the job is enqueued at once and resources are
/// reserved for it.
pub const SLA_WAITING_TIME_KEY: &str = "sla-waiting-time";

/// Key in `ResourceQuota.spec.hard` carrying the namespace weight.
pub const NAMESPACE_WEIGHT_KEY: &str = "gangway.sh/namespace.weight";
