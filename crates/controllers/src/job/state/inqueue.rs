use super::{pod_retain_phase_soft, State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase};

pub struct InqueueState;

#[async_trait]
impl State for InqueueState {
    async fn execute(
        &self,
        driver: &dyn StateDriver,
        ji: &JobInfo,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::AbortJob => {
                driver
                    .kill_job(
                        ji,
                        &pod_retain_phase_soft(),
                        Some(&|status| {
                            status.state.phase = JobPhase::Aborting;
                            true
                        }),
                    )
                    .await
            }
            Action::RestartJob => {
                driver
                    .kill_job(
                        ji,
                        &pod_retain_phase_soft(),
                        Some(&|status| {
                            status.state.phase = JobPhase::Restarting;
                            status.retry_count += 1;
                            true
                        }),
                    )
                    .await
            }
            Action::TerminateJob => {
                driver
                    .kill_job(
                        ji,
                        &pod_retain_phase_soft(),
                        Some(&|status| {
                            status.state.phase = JobPhase::Terminating;
                            true
                        }),
                    )
                    .await
            }
            _ => {
                let min_available = ji.job.as_ref().map(|j| j.spec.min_available).unwrap_or(0);
                driver
                    .sync_job(
                        ji,
                        Some(&move |status| {
                            if status.running >= min_available && min_available > 0 {
                                status.state.phase = JobPhase::Running;
                                return true;
                            }
                            false
                        }),
                    )
                    .await
            }
        }
    }
}
