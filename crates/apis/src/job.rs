//! Batch Job: the user-facing resource reconciled by the job controller.

use crate::meta::ObjectMeta;
use crate::pod::PodSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub scheduler_name: String,
    #[serde(default)]
    pub queue: String,
    /// Minimum number of pods that must be available for the job to run.
    #[serde(default)]
    pub min_available: i32,
    /// Maximum number of restart cycles before the job fails.
    #[serde(default)]
    pub max_retry: i32,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// One homogeneous group of replicated pods within a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub replicas: i32,
    /// Per-task restart budget; 0 falls back to the default, -1 is
    /// unlimited.
    #[serde(default)]
    pub max_retry: i32,
    #[serde(default)]
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Pending,
    Inqueue,
    Running,
    Restarting,
    Aborting,
    Aborted,
    Completing,
    Completed,
    Terminating,
    Terminated,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default)]
    pub phase: JobPhase,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub pending: i32,
    #[serde(default)]
    pub running: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
    #[serde(default)]
    pub terminating: i32,
    #[serde(default)]
    pub unknown: i32,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub min_available: i32,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Total declared replicas across all task specs.
    pub fn total_replicas(&self) -> i32 {
        self.spec.tasks.iter().map(|t| t.replicas).sum()
    }
}
