//! PodGroup: a co-scheduled group of pods with minimum-member semantics.

use crate::meta::ObjectMeta;
use crate::quantity::ResourceList;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodGroup {
    pub metadata: ObjectMeta,
    pub spec: PodGroupSpec,
    #[serde(default)]
    pub status: PodGroupStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupSpec {
    /// Minimum number of members that must be co-scheduled for the group to
    /// make progress.
    #[serde(default)]
    pub min_member: i32,
    /// Optional per-task minimum members, keyed by task-spec name.
    #[serde(default)]
    pub min_task_member: HashMap<String, i32>,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub priority_class_name: String,
    /// Minimum resources the whole group needs before it may enter a queue.
    #[serde(default)]
    pub min_resources: Option<ResourceList>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodGroupPhase {
    #[default]
    Pending,
    Running,
    Unknown,
    Inqueue,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodGroupConditionType {
    Scheduled,
    Unschedulable,
    NotEnoughResources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// One typed transition in the group's condition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupCondition {
    #[serde(rename = "type")]
    pub condition_type: PodGroupConditionType,
    pub status: ConditionStatus,
    /// Session UID that produced the transition.
    pub transition_id: String,
    pub last_transition_time: DateTime<Utc>,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupStatus {
    #[serde(default)]
    pub phase: PodGroupPhase,
    #[serde(default)]
    pub conditions: Vec<PodGroupCondition>,
    #[serde(default)]
    pub running: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
}

impl PodGroup {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }
}
