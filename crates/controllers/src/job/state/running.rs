use super::{pod_retain_phase_soft, total_replicas, State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase};

pub struct RunningState;

#[async_trait]
impl State for RunningState {
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
            Action::CompleteJob => {
                driver
                    .kill_job(
                        ji,
                        &pod_retain_phase_soft(),
                        Some(&|status| {
                            status.state.phase = JobPhase::Completing;
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
            _ => {
                let total = total_replicas(ji);
                driver
                    .sync_job(
                        ji,
                        Some(&move |status| {
                            if total > 0 && status.succeeded + status.failed >= total {
                                status.state.phase = JobPhase::Completing;
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
