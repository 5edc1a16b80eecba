use super::{pod_retain_phase_soft, total_replicas, State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase};

pub struct RestartingState;

#[async_trait]
impl State for RestartingState {
    async fn execute(
        &self,
        driver: &dyn StateDriver,
        ji: &JobInfo,
        _action: Action,
    ) -> Result<(), ControllerError> {
        let max_retry = ji.job.as_ref().map(|j| j.spec.max_retry).unwrap_or(0);
        let min_available = ji.job.as_ref().map(|j| j.spec.min_available).unwrap_or(0);
        let total = total_replicas(ji);

        driver
            .kill_job(
                ji,
                &pod_retain_phase_soft(),
                Some(&move |status| {
                    if status.retry_count >= max_retry {
                        // The restart budget is spent.
                        status.state.phase = JobPhase::Failed;
                        return true;
                    }
                    if total - status.terminating >= min_available {
                        status.state.phase = JobPhase::Pending;
                        return true;
                    }
                    false
                }),
            )
            .await
    }
}
