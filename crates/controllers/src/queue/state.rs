//! Queue states: open, closed, closing, unknown. Each state maps an
//! incoming action onto the controller's sync/open/close operations with a
//! status-updating closure.

use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Action, Queue, QueueState, QueueStatus};

/// Updates a queue status given the pod-group keys currently in the queue.
pub type UpdateQueueStatusFn = dyn Fn(&mut QueueStatus, &[String]) + Send + Sync;

/// The queue operations states execute against; the queue controller is
/// the production driver.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Recount pod-groups and push the status when it changed.
    async fn sync_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError>;

    /// Two-phase open: spec update, then status update through `update`.
    async fn open_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError>;

    /// Two-phase close, symmetric to open.
    async fn close_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError>;
}

#[async_trait]
pub trait State: Send + Sync {
    async fn execute(
        &self,
        driver: &dyn QueueDriver,
        queue: &Queue,
        action: Action,
    ) -> Result<(), ControllerError>;
}

/// State for the queue's current status; a blank state counts as open.
pub fn new_state(queue: &Queue) -> Box<dyn State> {
    match queue.status.state {
        QueueState::Open => Box::new(OpenState),
        QueueState::Closed => Box::new(ClosedState),
        QueueState::Closing => Box::new(ClosingState),
        QueueState::Unknown => Box::new(UnknownState),
    }
}

fn close_towards(status: &mut QueueStatus, pod_groups: &[String]) {
    status.state = if pod_groups.is_empty() {
        QueueState::Closed
    } else {
        QueueState::Closing
    };
}

struct OpenState;

#[async_trait]
impl State for OpenState {
    async fn execute(
        &self,
        driver: &dyn QueueDriver,
        queue: &Queue,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::CloseQueue => driver.close_queue(queue, Some(&close_towards)).await,
            _ => {
                driver
                    .sync_queue(queue, Some(&|status, _| status.state = QueueState::Open))
                    .await
            }
        }
    }
}

struct ClosedState;

#[async_trait]
impl State for ClosedState {
    async fn execute(
        &self,
        driver: &dyn QueueDriver,
        queue: &Queue,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::OpenQueue => {
                driver
                    .open_queue(queue, Some(&|status, _| status.state = QueueState::Open))
                    .await
            }
            _ => {
                driver
                    .sync_queue(queue, Some(&|status, _| status.state = QueueState::Closed))
                    .await
            }
        }
    }
}

struct ClosingState;

#[async_trait]
impl State for ClosingState {
    async fn execute(
        &self,
        driver: &dyn QueueDriver,
        queue: &Queue,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::OpenQueue => {
                driver
                    .open_queue(queue, Some(&|status, _| status.state = QueueState::Open))
                    .await
            }
            _ => driver.sync_queue(queue, Some(&close_towards)).await,
        }
    }
}

struct UnknownState;

#[async_trait]
impl State for UnknownState {
    async fn execute(
        &self,
        driver: &dyn QueueDriver,
        queue: &Queue,
        action: Action,
    ) -> Result<(), ControllerError> {
        match action {
            Action::OpenQueue => {
                driver
                    .open_queue(queue, Some(&|status, _| status.state = QueueState::Open))
                    .await
            }
            Action::CloseQueue => driver.close_queue(queue, Some(&close_towards)).await,
            _ => driver.sync_queue(queue, None).await,
        }
    }
}
