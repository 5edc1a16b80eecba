//! Scheduler error types.

use gangway_core::DomainError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("job {0} not found in session")]
    JobNotFound(String),

    #[error("node {0} not found in session")]
    NodeNotFound(String),

    #[error("task {task} does not fit on node {node}: {reason}")]
    Predicate {
        task: String,
        node: String,
        reason: String,
    },

    #[error("binding failed: {0}")]
    Bind(String),

    #[error("eviction failed: {0}")]
    Evict(String),

    #[error("status update failed: {0}")]
    StatusUpdate(String),

    #[error("volume operation failed: {0}")]
    Volume(String),

    #[error("plugin {0} is already registered")]
    DuplicatePlugin(String),

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
