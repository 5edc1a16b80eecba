use super::{pod_retain_phase_soft, State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, JobPhase};

pub struct CompletingState;

#[async_trait]
impl State for CompletingState {
    async fn execute(
        &self,
        driver: &dyn StateDriver,
        ji: &JobInfo,
        _action: Action,
    ) -> Result<(), ControllerError> {
        driver
            .kill_job(
                ji,
                &pod_retain_phase_soft(),
                Some(&|status| {
                    if status.terminating != 0 {
                        return false;
                    }
                    status.state.phase = JobPhase::Completed;
                    true
                }),
            )
            .await
    }
}
