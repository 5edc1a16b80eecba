//! The queue controller: keeps queue status aggregates fresh and applies
//! open/close commands issued through the command bus.

pub mod state;

use crate::apis::Request;
use crate::client::ControlClient;
use crate::error::ControllerError;
use crate::framework::{Controller, ControllerOption};
use crate::workqueue::RateLimitingQueue;
use async_trait::async_trait;
use gangway_apis::{
    Action, Command, EventRecorder, EventType, PodGroup, PodGroupPhase, Queue, QueueStatus,
};
use parking_lot::Mutex;
use state::{QueueDriver, UpdateQueueStatusFn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const CONTROLLER_NAME: &str = "queue-controller";

/// A queue-targeted command lifted off the bus. Queues are cluster-scoped,
/// so the target carries no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandRequest {
    pub namespace: String,
    pub name: String,
    pub action: Action,
    pub target: String,
}

pub struct QueueController {
    client: Arc<dyn ControlClient>,
    recorder: Arc<dyn EventRecorder>,

    queue: Arc<RateLimitingQueue<Request>>,
    cmd_queue: Arc<RateLimitingQueue<CommandRequest>>,

    /// queue name → pod-group keys submitted to it.
    pod_groups: Mutex<HashMap<String, HashSet<String>>>,

    max_requeue_num: i32,
}

impl QueueController {
    pub fn new(opt: &ControllerOption) -> Self {
        QueueController {
            client: Arc::clone(&opt.client),
            recorder: Arc::clone(&opt.recorder),
            queue: Arc::new(RateLimitingQueue::new()),
            cmd_queue: Arc::new(RateLimitingQueue::new()),
            pod_groups: Mutex::new(HashMap::new()),
            max_requeue_num: opt.max_requeue_num,
        }
    }

    /* Event intake */

    pub fn on_queue_added(&self, queue: &Queue) {
        self.queue
            .add(Request::for_queue(queue.name(), Action::SyncQueue));
    }

    pub fn on_queue_updated(&self, queue: &Queue) {
        self.queue
            .add(Request::for_queue(queue.name(), Action::SyncQueue));
    }

    pub fn on_queue_deleted(&self, queue: &Queue) {
        self.pod_groups.lock().remove(queue.name());
    }

    pub fn on_pod_group_added(&self, pg: &PodGroup) {
        self.pod_groups
            .lock()
            .entry(pg.spec.queue.clone())
            .or_default()
            .insert(pg.metadata.key());
        self.queue
            .add(Request::for_queue(&pg.spec.queue, Action::SyncQueue));
    }

    pub fn on_pod_group_updated(&self, old: &PodGroup, new: &PodGroup) {
        if old.spec.queue != new.spec.queue {
            let mut groups = self.pod_groups.lock();
            if let Some(set) = groups.get_mut(&old.spec.queue) {
                set.remove(&old.metadata.key());
            }
            groups
                .entry(new.spec.queue.clone())
                .or_default()
                .insert(new.metadata.key());
            drop(groups);
            self.queue
                .add(Request::for_queue(&old.spec.queue, Action::SyncQueue));
        }
        self.queue
            .add(Request::for_queue(&new.spec.queue, Action::SyncQueue));
    }

    pub fn on_pod_group_deleted(&self, pg: &PodGroup) {
        if let Some(set) = self.pod_groups.lock().get_mut(&pg.spec.queue) {
            set.remove(&pg.metadata.key());
        }
        self.queue
            .add(Request::for_queue(&pg.spec.queue, Action::SyncQueue));
    }

    pub fn on_command_added(&self, cmd: &Command) {
        if !cmd.is_queue_reference() {
            return;
        }
        self.cmd_queue.add(CommandRequest {
            namespace: cmd.metadata.namespace.clone(),
            name: cmd.metadata.name.clone(),
            action: cmd.action,
            target: cmd.target_object.name.clone(),
        });
    }

    fn pod_group_keys(&self, queue_name: &str) -> Vec<String> {
        self.pod_groups
            .lock()
            .get(queue_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /* Reconciliation */

    /// Handle one queue request through the state machine.
    pub async fn sync(&self, req: &Request) -> Result<(), ControllerError> {
        let queue = match self.client.get_queue(&req.queue_name).await {
            Ok(queue) => queue,
            Err(err) if err.is_not_found() => {
                debug!(queue = %req.queue_name, "queue gone, nothing to sync");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let action = req.action.unwrap_or(Action::SyncQueue);
        debug!(queue = %queue.name(), state = ?queue.status.state, %action, "executing queue state machine");
        let queue_state = state::new_state(&queue);
        queue_state.execute(self, &queue, action).await
    }

    /// Consume one command: delete it from the store (fire-and-forget) and
    /// translate it into a queue request.
    pub async fn handle_command(&self, cmd: &CommandRequest) -> Result<(), ControllerError> {
        match self.client.delete_command(&cmd.namespace, &cmd.name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.queue.add(Request::for_queue(&cmd.target, cmd.action));
        Ok(())
    }

    async fn handle_queue_error(&self, req: Request, err: ControllerError) {
        if self.max_requeue_num == -1
            || self.queue.num_requeues(&req) < self.max_requeue_num as u32
        {
            debug!(queue = %req.queue_name, %err, "requeueing queue request");
            RateLimitingQueue::add_rate_limited(&self.queue, req);
            return;
        }
        let action = req
            .action
            .map(|a| a.to_string())
            .unwrap_or_else(|| "SyncQueue".to_string());
        self.recorder.event(
            &req.queue_name,
            EventType::Warning,
            &action,
            &format!("{} queue failed: {}", action, err),
        );
        warn!(queue = %req.queue_name, %err, "dropping queue request");
        self.queue.forget(&req);
    }

    async fn queue_worker(&self) {
        while let Some(req) = self.queue.get().await {
            match self.sync(&req).await {
                Ok(()) => self.queue.forget(&req),
                Err(err) => self.handle_queue_error(req.clone(), err).await,
            }
            self.queue.done(&req);
        }
    }

    async fn cmd_worker(&self) {
        while let Some(cmd) = self.cmd_queue.get().await {
            match self.handle_command(&cmd).await {
                Ok(()) => self.cmd_queue.forget(&cmd),
                Err(err) => {
                    if self.max_requeue_num == -1
                        || self.cmd_queue.num_requeues(&cmd) < self.max_requeue_num as u32
                    {
                        RateLimitingQueue::add_rate_limited(&self.cmd_queue, cmd.clone());
                    } else {
                        warn!(command = %cmd.name, %err, "dropping command");
                        self.cmd_queue.forget(&cmd);
                    }
                }
            }
            self.cmd_queue.done(&cmd);
        }
    }
}

#[async_trait]
impl QueueDriver for QueueController {
    async fn sync_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError> {
        debug!(queue = %queue.name(), "syncing queue");

        let pod_groups = self.pod_group_keys(queue.name());
        let mut status = QueueStatus {
            state: queue.status.state,
            ..Default::default()
        };

        for key in &pod_groups {
            let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
            let pg = match self.client.get_pod_group(namespace, name).await {
                Ok(pg) => pg,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            match pg.status.phase {
                PodGroupPhase::Pending => status.pending += 1,
                PodGroupPhase::Running => status.running += 1,
                PodGroupPhase::Unknown => status.unknown += 1,
                PodGroupPhase::Inqueue => status.inqueue += 1,
                PodGroupPhase::Completed => {}
            }
        }

        if let Some(update) = update {
            update(&mut status, &pod_groups);
        }

        if status == queue.status {
            return Ok(());
        }

        let mut updated = queue.clone();
        updated.status = status;
        self.client.update_queue_status(&updated).await?;
        Ok(())
    }

    async fn open_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError> {
        debug!(queue = %queue.name(), "opening queue");

        let mut updated = queue.clone();
        updated.status.state = gangway_apis::QueueState::Open;

        if queue.status.state != updated.status.state {
            match self.client.update_queue(&updated).await {
                Ok(_) => {
                    self.recorder.event(
                        queue.name(),
                        EventType::Normal,
                        "OpenQueue",
                        "Open queue succeed",
                    );
                }
                Err(err) => {
                    self.recorder.event(
                        queue.name(),
                        EventType::Warning,
                        "OpenQueue",
                        &format!("Open queue failed for {}", err),
                    );
                    return Err(err);
                }
            }
        } else {
            return Ok(());
        }

        // Second phase: refresh and push the final status.
        let mut fresh = self.client.get_queue(queue.name()).await?;
        let Some(update) = update else {
            return Err(ControllerError::Invalid(
                "open queue requires a status update function".to_string(),
            ));
        };
        let pod_groups = self.pod_group_keys(queue.name());
        update(&mut fresh.status, &pod_groups);

        if fresh.status.state != queue.status.state {
            if let Err(err) = self.client.update_queue_status(&fresh).await {
                self.recorder.event(
                    queue.name(),
                    EventType::Warning,
                    "OpenQueue",
                    &format!(
                        "Update queue status from {:?} to {:?} failed for {}",
                        queue.status.state, fresh.status.state, err
                    ),
                );
                return Err(err);
            }
        }
        Ok(())
    }

    async fn close_queue(
        &self,
        queue: &Queue,
        update: Option<&UpdateQueueStatusFn>,
    ) -> Result<(), ControllerError> {
        debug!(queue = %queue.name(), "closing queue");

        let mut updated = queue.clone();
        updated.status.state = gangway_apis::QueueState::Closed;

        if queue.status.state != updated.status.state {
            match self.client.update_queue(&updated).await {
                Ok(_) => {
                    self.recorder.event(
                        queue.name(),
                        EventType::Normal,
                        "CloseQueue",
                        "Close queue succeed",
                    );
                }
                Err(err) => {
                    self.recorder.event(
                        queue.name(),
                        EventType::Warning,
                        "CloseQueue",
                        &format!("Close queue failed for {}", err),
                    );
                    return Err(err);
                }
            }
        } else {
            return Ok(());
        }

        let mut fresh = self.client.get_queue(queue.name()).await?;
        let Some(update) = update else {
            return Err(ControllerError::Invalid(
                "close queue requires a status update function".to_string(),
            ));
        };
        let pod_groups = self.pod_group_keys(queue.name());
        update(&mut fresh.status, &pod_groups);

        if fresh.status.state != queue.status.state {
            if let Err(err) = self.client.update_queue_status(&fresh).await {
                self.recorder.event(
                    queue.name(),
                    EventType::Warning,
                    "CloseQueue",
                    &format!(
                        "Update queue status from {:?} to {:?} failed for {}",
                        queue.status.state, fresh.status.state, err
                    ),
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for QueueController {
    fn name(&self) -> &str {
        CONTROLLER_NAME
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("starting queue controller");
        tokio::select! {
            _ = async { tokio::join!(self.queue_worker(), self.cmd_worker()) } => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    self.queue.shut_down();
                    self.cmd_queue.shut_down();
                }
            }
        }
        info!("queue controller stopped");
    }
}
