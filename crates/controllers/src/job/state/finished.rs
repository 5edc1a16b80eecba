use super::{State, StateDriver};
use crate::apis::JobInfo;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::Action;

/// Terminal phases ignore every action.
pub struct FinishedState;

#[async_trait]
impl State for FinishedState {
    async fn execute(
        &self,
        _driver: &dyn StateDriver,
        _ji: &JobInfo,
        _action: Action,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
}
