//! Command: the bus resource that drives job and queue transitions.

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    OpenQueue,
    CloseQueue,
    ResumeJob,
    AbortJob,
    TerminateJob,
    CompleteJob,
    RestartJob,
    SyncJob,
    /// Synthetic action for queue reconciliation requests not driven by a
    /// command.
    SyncQueue,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::OpenQueue => "OpenQueue",
            Action::CloseQueue => "CloseQueue",
            Action::ResumeJob => "ResumeJob",
            Action::AbortJob => "AbortJob",
            Action::TerminateJob => "TerminateJob",
            Action::CompleteJob => "CompleteJob",
            Action::RestartJob => "RestartJob",
            Action::SyncJob => "SyncJob",
            Action::SyncQueue => "SyncQueue",
        };
        f.write_str(s)
    }
}

/// Reference to the object a command targets. Queues are cluster-scoped, so
/// the namespace is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetObject {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub metadata: ObjectMeta,
    pub action: Action,
    pub target_object: TargetObject,
}

impl Command {
    /// Whether this command targets a queue.
    pub fn is_queue_reference(&self) -> bool {
        self.target_object.kind == "Queue"
    }

    /// Whether this command targets a job.
    pub fn is_job_reference(&self) -> bool {
        self.target_object.kind == "Job"
    }
}
