//! Callback signatures plugins register against a session.

use crate::error::SchedulerError;
use gangway_core::{JobId, JobInfo, NamespaceInfo, NodeInfo, QueueInfo, SiloClusterInfo, TaskId, TaskInfo};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Verdict of an evictability or admission callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permit,
    Abstain,
    Reject,
}

/// Vote values for tri-state callbacks; the final verdict is the sign of
/// the summed votes.
pub const PERMIT: i32 = 1;
pub const ABSTAIN: i32 = 0;
pub const REJECT: i32 = -1;

/// Result of a job validity check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateResult {
    pub pass: bool,
    pub reason: String,
    pub message: String,
}

/// Comparators return `Less` when the first argument should come first.
pub type JobOrderFn = Box<dyn Fn(&JobInfo, &JobInfo) -> Ordering + Send>;
pub type TaskOrderFn = Box<dyn Fn(&TaskInfo, &TaskInfo) -> Ordering + Send>;
pub type QueueOrderFn = Box<dyn Fn(&QueueInfo, &QueueInfo) -> Ordering + Send>;
pub type NamespaceOrderFn = Box<dyn Fn(&NamespaceInfo, &NamespaceInfo) -> Ordering + Send>;
pub type ClusterOrderFn = Box<dyn Fn(&SiloClusterInfo, &SiloClusterInfo) -> Ordering + Send>;

/// Hard feasibility gate; `Ok(())` passes.
pub type PredicateFn = Box<dyn Fn(&TaskInfo, &NodeInfo) -> Result<(), SchedulerError> + Send>;

/// Floating-point score for one node; summed across plugins.
pub type NodeOrderFn = Box<dyn Fn(&TaskInfo, &NodeInfo) -> Result<f64, SchedulerError> + Send>;

/// Scores for a batch of nodes at once, keyed by node name.
pub type BatchNodeOrderFn =
    Box<dyn Fn(&TaskInfo, &[&NodeInfo]) -> Result<HashMap<String, f64>, SchedulerError> + Send>;

/// Per-node mapping stage of map/reduce scoring.
pub type NodeMapFn = Box<dyn Fn(&TaskInfo, &NodeInfo) -> Result<f64, SchedulerError> + Send>;

/// Reduction stage: mutate the per-node score map in place.
pub type NodeReduceFn =
    Box<dyn Fn(&TaskInfo, &mut HashMap<String, f64>) -> Result<(), SchedulerError> + Send>;

/// Given an evictor and candidate victims, select the subset this plugin
/// would allow evicting.
pub type EvictableFn = Box<dyn Fn(&TaskInfo, &[TaskInfo]) -> (Vec<TaskId>, Verdict) + Send>;

pub type ValidateFn = Box<dyn Fn(&JobInfo) -> bool + Send>;
pub type ValidateExFn = Box<dyn Fn(&JobInfo) -> Option<ValidateResult> + Send>;
pub type VoteFn = Box<dyn Fn(&JobInfo) -> i32 + Send>;
pub type JobEnqueuedFn = Box<dyn Fn(&JobInfo) + Send>;
pub type TargetJobFn = Box<dyn Fn(&[&JobInfo]) -> Option<JobId> + Send>;
pub type ReservedNodesFn = Box<dyn Fn() + Send>;
pub type VictimTasksFn = Box<dyn Fn() -> Vec<TaskInfo> + Send>;
pub type UnderUsedResourceFn = Box<dyn Fn(&QueueInfo) -> Vec<String> + Send>;
pub type OverUsedFn = Box<dyn Fn(&QueueInfo) -> bool + Send>;
