//! External resource model for the gangway batch orchestrator.
//!
//! These are the wire-shaped objects the scheduler and controllers consume
//! from the declarative resource store: plain data with `{metadata, spec,
//! status}` envelopes, JSON-serializable, no behavior beyond small
//! accessors. The scheduler-side domain model lives in `gangway-core`.

pub mod annotations;
pub mod command;
pub mod event;
pub mod job;
pub mod meta;
pub mod node;
pub mod numatopology;
pub mod pod;
pub mod podgroup;
pub mod priority;
pub mod quantity;
pub mod queue;
pub mod quota;
pub mod watch;

pub use command::{Action, Command, TargetObject};
pub use event::{EventRecorder, EventType, FakeRecorder, RecordedEvent};
pub use job::{Job, JobPhase, JobSpec, JobState, JobStatus, PodTemplate, TaskSpec};
pub use meta::{ObjectMeta, OwnerReference};
pub use node::{Node, NodeSpec, NodeStatus};
pub use numatopology::{CpuDetail, NumaResEntry, Numatopology, NumatopologySpec};
pub use pod::{Container, ContainerStatus, Pod, PodPhase, PodSpec, PodStatus};
pub use podgroup::{
    ConditionStatus, PodGroup, PodGroupCondition, PodGroupConditionType, PodGroupPhase,
    PodGroupSpec, PodGroupStatus,
};
pub use priority::PriorityClass;
pub use quantity::{parse_quantity, QuantityError, ResourceList};
pub use queue::{Queue, QueueSpec, QueueState, QueueStatus};
pub use quota::{ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus};
pub use watch::WatchEvent;
