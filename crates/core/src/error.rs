//! Error types for the domain model.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// A task-status transition outside the allowed table.
    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// A node could not accommodate a task; the node is out of sync with
    /// the cluster and must be resynchronized.
    #[error("allocate failed: {reason}")]
    AllocateFail { reason: String },

    /// Componentwise subtraction would go negative.
    #[error("resource underflow: short of {shortfall}")]
    ResourceUnderflow { shortfall: String },

    #[error("task {task} not found in job {job}")]
    TaskNotFound { task: String, job: String },

    #[error("task {task} already exists on node {node}")]
    TaskExistsOnNode { task: String, node: String },

    #[error("task {task} not found on node {node}")]
    TaskNotOnNode { task: String, node: String },

    #[error("malformed quantity: {0}")]
    Quantity(#[from] gangway_apis::QuantityError),
}
