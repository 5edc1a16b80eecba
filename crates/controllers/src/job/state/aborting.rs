use super::{pod_retain_phase_soft, State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase};

pub struct AbortingState;

#[async_trait]
impl State for AbortingState {
    async fn execute(
        &self,
        driver: &dyn StateDriver,
        ji: &JobInfo,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::ResumeJob => {
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
            _ => {
                driver
                    .kill_job(
                        ji,
                        &pod_retain_phase_soft(),
                        Some(&|status| {
                            if status.terminating != 0 || status.pending != 0 || status.running != 0
                            {
                                return false;
                            }
                            status.state.phase = JobPhase::Aborted;
                            true
                        }),
                    )
                    .await
            }
        }
    }
}
