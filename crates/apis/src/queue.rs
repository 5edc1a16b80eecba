//! Queue: a weighted, cluster-scoped share of cluster resources.

use crate::meta::ObjectMeta;
use crate::quantity::ResourceList;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub metadata: ObjectMeta,
    pub spec: QueueSpec,
    #[serde(default)]
    pub status: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    #[serde(default = "QueueSpec::default_weight")]
    pub weight: i32,
    /// Upper bound on the resources the queue may consume, if set.
    #[serde(default)]
    pub capability: Option<ResourceList>,
    /// Whether resources allocated to this queue may be reclaimed by others.
    #[serde(default)]
    pub reclaimable: Option<bool>,
}

impl QueueSpec {
    fn default_weight() -> i32 {
        1
    }
}

impl Default for QueueSpec {
    fn default() -> Self {
        QueueSpec {
            weight: 1,
            capability: None,
            reclaimable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueState {
    Open,
    Closed,
    Closing,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub state: QueueState,
    /// Pod-group counts by phase.
    #[serde(default)]
    pub pending: i32,
    #[serde(default)]
    pub running: i32,
    #[serde(default)]
    pub unknown: i32,
    #[serde(default)]
    pub inqueue: i32,
}

impl Default for QueueStatus {
    fn default() -> Self {
        QueueStatus {
            state: QueueState::Open,
            pending: 0,
            running: 0,
            unknown: 0,
            inqueue: 0,
        }
    }
}

impl Queue {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
