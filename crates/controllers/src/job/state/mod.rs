//! Job lifecycle states. Each state maps (current phase, action) onto a
//! concrete pod-set mutation executed through the driver.

mod aborted;
mod aborting;
mod completing;
mod finished;
mod inqueue;
mod pending;
mod restarting;
mod running;
mod terminating;

use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase, JobStatus, PodPhase};
use std::collections::HashSet;

/// Mutates a job status; returns true when the phase changed and the
/// status must be written back even if counts did not move.
pub type UpdateStatusFn = dyn Fn(&mut JobStatus) -> bool + Send + Sync;

/// Pod phases to retain when killing a job.
#[derive(Debug, Clone, Default)]
pub struct PodRetainPhase(HashSet<PodPhase>);

impl PodRetainPhase {
    pub fn retains(&self, phase: PodPhase) -> bool {
        self.0.contains(&phase)
    }
}

/// Retain finished pods: Succeeded and Failed survive the kill.
pub fn pod_retain_phase_soft() -> PodRetainPhase {
    PodRetainPhase(HashSet::from([PodPhase::Succeeded, PodPhase::Failed]))
}

/// Retain nothing.
pub fn pod_retain_phase_hard() -> PodRetainPhase {
    PodRetainPhase(HashSet::new())
}

/// The pod-set operations states execute against. The job controller is
/// the production driver.
#[async_trait]
pub trait StateDriver: Send + Sync {
    /// Delete the job's non-retained pods and write the recomputed status
    /// back, applying `update` on top.
    async fn kill_job(
        &self,
        ji: &JobInfo,
        retain: &PodRetainPhase,
        update: Option<&UpdateStatusFn>,
    ) -> Result<(), ControllerError>;

    /// Recreate missing pods up to replicas, delete surplus ones, and
    /// write the recomputed status back, applying `update` on top.
    async fn sync_job(
        &self,
        ji: &JobInfo,
        update: Option<&UpdateStatusFn>,
    ) -> Result<(), ControllerError>;
}

#[async_trait]
pub trait State: Send + Sync {
    async fn execute(
        &self,
        driver: &dyn StateDriver,
        ji: &JobInfo,
        action: Action,
    ) -> Result<(), ControllerError>;
}

/// State for the job's current phase.
pub fn new_state(phase: JobPhase) -> Box<dyn State> {
    match phase {
        JobPhase::Pending => Box::new(pending::PendingState),
        JobPhase::Inqueue => Box::new(inqueue::InqueueState),
        JobPhase::Running => Box::new(running::RunningState),
        JobPhase::Restarting => Box::new(restarting::RestartingState),
        JobPhase::Aborting => Box::new(aborting::AbortingState),
        JobPhase::Aborted => Box::new(aborted::AbortedState),
        JobPhase::Completing => Box::new(completing::CompletingState),
        JobPhase::Terminating => Box::new(terminating::TerminatingState),
        JobPhase::Completed | JobPhase::Terminated | JobPhase::Failed => {
            Box::new(finished::FinishedState)
        }
    }
}

/// Total declared replicas of a job info.
pub(crate) fn total_replicas(ji: &JobInfo) -> i32 {
    ji.job.as_ref().map(|j| j.total_replicas()).unwrap_or(0)
}
