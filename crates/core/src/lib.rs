//! Scheduler-side domain model for the gangway batch orchestrator.
//!
//! Entities are arenas keyed by stable identifiers: a `JobInfo` owns its
//! tasks, a `NodeInfo` keeps accounting copies of the tasks placed on it,
//! and all cross-entity mutation goes through the cache or session so the
//! two sides and the status index stay consistent.

pub mod cluster;
pub mod cpuset;
pub mod error;
pub mod fit_error;
pub mod job;
pub mod namespace;
pub mod node;
pub mod numa;
pub mod queue;
pub mod resource;
pub mod task;

pub use cluster::{ClusterInfo, SiloClusterInfo};
pub use cpuset::CpuSet;
pub use error::DomainError;
pub use fit_error::{FitError, FitErrors};
pub use job::{DisruptionBudget, JobId, JobInfo};
pub use namespace::{NamespaceCollection, NamespaceInfo, DEFAULT_NAMESPACE_WEIGHT};
pub use node::{NodeInfo, NodePhase, NodeState};
pub use numa::{allocate_sets, release_sets, NumaChangeFlag, NumaResourceInfo, NumaTopoInfo, ResNumaSets};
pub use queue::{QueueId, QueueInfo};
pub use resource::{Resource, DEFAULT_TOLERANCE};
pub use task::{
    allocated_status, job_id_of, validate_status_update, TaskId, TaskInfo, TaskNumaInfo,
    TaskStatus, TransactionContext,
};
