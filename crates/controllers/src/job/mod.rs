//! The job controller: reconciles batch jobs through their lifecycle
//! state machine, creating and killing pods as states demand.

pub mod state;

use crate::apis::{job_key, JobInfo, Request};
use crate::cache::{job_key_by_request, JobCache};
use crate::client::ControlClient;
use crate::error::ControllerError;
use crate::framework::{Controller, ControllerOption};
use crate::workqueue::RateLimitingQueue;
use async_trait::async_trait;
use gangway_apis::{
    annotations, Action, Command, EventRecorder, EventType, Job, JobStatus, Pod, PodPhase,
    TaskSpec,
};
use state::{PodRetainPhase, StateDriver, UpdateStatusFn};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const CONTROLLER_NAME: &str = "job-controller";

pub struct JobController {
    client: Arc<dyn ControlClient>,
    recorder: Arc<dyn EventRecorder>,
    pub cache: JobCache,
    queue: Arc<RateLimitingQueue<Request>>,
    max_requeue_num: i32,
}

impl JobController {
    pub fn new(opt: &ControllerOption) -> Self {
        JobController {
            client: Arc::clone(&opt.client),
            recorder: Arc::clone(&opt.recorder),
            cache: JobCache::new(),
            queue: Arc::new(RateLimitingQueue::new()),
            max_requeue_num: opt.max_requeue_num,
        }
    }

    /* Event intake */

    pub fn on_job_added(&self, job: &Job) {
        if let Err(err) = self.cache.add(job) {
            error!(job = %job.metadata.key(), %err, "failed to cache job");
            return;
        }
        self.queue
            .add(Request::for_job(job.namespace(), job.name(), None));
    }

    pub fn on_job_updated(&self, job: &Job) {
        if let Err(err) = self.cache.update(job) {
            error!(job = %job.metadata.key(), %err, "failed to update cached job");
            return;
        }
        self.queue
            .add(Request::for_job(job.namespace(), job.name(), None));
    }

    pub fn on_job_deleted(&self, job: &Job) {
        if let Err(err) = self.cache.delete(job) {
            error!(job = %job.metadata.key(), %err, "failed to delete cached job");
        }
    }

    pub fn on_pod_added(&self, pod: &Pod) {
        if let Err(err) = self.cache.add_pod(pod) {
            debug!(pod = %pod.metadata.key(), %err, "pod not cached");
            return;
        }
        self.enqueue_pod_job(pod);
    }

    pub fn on_pod_updated(&self, pod: &Pod) {
        if let Err(err) = self.cache.update_pod(pod) {
            debug!(pod = %pod.metadata.key(), %err, "pod not updated in cache");
            return;
        }
        self.enqueue_pod_job(pod);
    }

    pub fn on_pod_deleted(&self, pod: &Pod) {
        if let Err(err) = self.cache.delete_pod(pod) {
            debug!(pod = %pod.metadata.key(), %err, "pod not deleted from cache");
            return;
        }
        self.enqueue_pod_job(pod);
    }

    fn enqueue_pod_job(&self, pod: &Pod) {
        if let Some(job_name) = pod.annotation(annotations::JOB_NAME_KEY) {
            self.queue
                .add(Request::for_job(pod.namespace(), job_name, None));
        }
    }

    /// Consume a command targeting a job: delete it from the store
    /// (fire-and-forget) and queue the carried action.
    pub async fn on_command(&self, cmd: &Command) -> Result<(), ControllerError> {
        if !cmd.is_job_reference() {
            return Ok(());
        }
        match self
            .client
            .delete_command(cmd.metadata.namespace.as_str(), cmd.metadata.name.as_str())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let namespace = cmd
            .target_object
            .namespace
            .clone()
            .unwrap_or_else(|| cmd.metadata.namespace.clone());
        self.queue.add(Request::for_job(
            &namespace,
            &cmd.target_object.name,
            Some(cmd.action),
        ));
        Ok(())
    }

    /// Reconcile one request through the state machine.
    pub async fn sync(&self, req: &Request) -> Result<(), ControllerError> {
        let key = job_key_by_request(req);
        let ji = match self.cache.get(&key) {
            Ok(ji) => ji,
            Err(err) if err.is_not_found() => {
                debug!(job = %key, "job gone, nothing to reconcile");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let phase = ji
            .job
            .as_ref()
            .map(|j| j.status.state.phase)
            .unwrap_or_default();
        let action = req.action.unwrap_or(Action::SyncJob);
        debug!(job = %key, ?phase, %action, "executing job state machine");

        let state = state::new_state(phase);
        state.execute(self, &ji, action).await
    }

    async fn handle_error(&self, req: Request, err: ControllerError) {
        if self.max_requeue_num == -1
            || self.queue.num_requeues(&req) < self.max_requeue_num as u32
        {
            debug!(job = %job_key(&req.namespace, &req.job_name), %err, "requeueing job request");
            RateLimitingQueue::add_rate_limited(&self.queue, req);
            return;
        }
        self.recorder.event(
            &job_key(&req.namespace, &req.job_name),
            EventType::Warning,
            &req.action.map(|a| a.to_string()).unwrap_or_else(|| "SyncJob".to_string()),
            &format!("job reconciliation dropped: {}", err),
        );
        warn!(job = %job_key(&req.namespace, &req.job_name), %err, "dropping job request");
        self.queue.forget(&req);
    }

    async fn worker(&self) {
        while let Some(req) = self.queue.get().await {
            match self.sync(&req).await {
                Ok(()) => self.queue.forget(&req),
                Err(err) => self.handle_error(req.clone(), err).await,
            }
            self.queue.done(&req);
        }
    }

    fn classify(phase: PodPhase, status: &mut JobStatus) {
        match phase {
            PodPhase::Pending => status.pending += 1,
            PodPhase::Running => status.running += 1,
            PodPhase::Succeeded => status.succeeded += 1,
            PodPhase::Failed => status.failed += 1,
            PodPhase::Unknown => status.unknown += 1,
        }
    }

    async fn write_status(
        &self,
        job: &Job,
        mut status: JobStatus,
        update: Option<&UpdateStatusFn>,
    ) -> Result<(), ControllerError> {
        status.min_available = job.spec.min_available;
        let phase_changed = update.map(|f| f(&mut status)).unwrap_or(false);

        if phase_changed && status.state.phase != job.status.state.phase {
            info!(
                job = %job.metadata.key(),
                from = ?job.status.state.phase,
                to = ?status.state.phase,
                "job phase transition"
            );
        }

        let mut updated = job.clone();
        updated.status = status;
        let stored = self.client.update_job_status(&updated).await?;
        self.cache.update(&stored)
    }
}

#[async_trait]
impl StateDriver for JobController {
    async fn kill_job(
        &self,
        ji: &JobInfo,
        retain: &PodRetainPhase,
        update: Option<&UpdateStatusFn>,
    ) -> Result<(), ControllerError> {
        let Some(job) = &ji.job else {
            return Ok(());
        };

        let mut status = JobStatus {
            state: job.status.state.clone(),
            retry_count: job.status.retry_count,
            ..Default::default()
        };

        for pods in ji.pods.values() {
            for pod in pods.values() {
                if pod.metadata.deletion_timestamp.is_some() {
                    status.terminating += 1;
                    continue;
                }
                if retain.retains(pod.status.phase) {
                    Self::classify(pod.status.phase, &mut status);
                    continue;
                }
                match self.client.delete_pod(pod.namespace(), pod.name()).await {
                    Ok(()) => {
                        let _ = self.cache.delete_pod(pod);
                        status.terminating += 1;
                    }
                    Err(err) if err.is_not_found() => {
                        let _ = self.cache.delete_pod(pod);
                    }
                    Err(err) => {
                        error!(pod = %pod.metadata.key(), %err, "failed to delete pod");
                        Self::classify(pod.status.phase, &mut status);
                    }
                }
            }
        }

        self.write_status(job, status, update).await
    }

    async fn sync_job(
        &self,
        ji: &JobInfo,
        update: Option<&UpdateStatusFn>,
    ) -> Result<(), ControllerError> {
        let Some(job) = &ji.job else {
            return Ok(());
        };

        let mut status = JobStatus {
            state: job.status.state.clone(),
            retry_count: job.status.retry_count,
            ..Default::default()
        };

        for task in &job.spec.tasks {
            let existing = ji.pods.get(&task.name).cloned().unwrap_or_default();
            let mut expected = std::collections::HashSet::new();

            for index in 0..task.replicas.max(0) {
                let pod_name = format!("{}-{}-{}", job.name(), task.name, index);
                expected.insert(pod_name.clone());

                match existing.get(&pod_name) {
                    Some(pod) => Self::classify(pod.status.phase, &mut status),
                    None => {
                        let pod = build_task_pod(job, task, index);
                        match self.client.create_pod(&pod).await {
                            Ok(created) => {
                                let _ = self.cache.add_pod(&created);
                                status.pending += 1;
                            }
                            Err(err) => {
                                error!(pod = %pod.metadata.key(), %err, "failed to create pod");
                                return Err(err);
                            }
                        }
                    }
                }
            }

            // Surplus pods beyond the declared replicas go away.
            for (name, pod) in &existing {
                if expected.contains(name) {
                    continue;
                }
                match self.client.delete_pod(pod.namespace(), pod.name()).await {
                    Ok(()) => {
                        let _ = self.cache.delete_pod(pod);
                        status.terminating += 1;
                    }
                    Err(err) if err.is_not_found() => {
                        let _ = self.cache.delete_pod(pod);
                    }
                    Err(err) => error!(pod = %pod.metadata.key(), %err, "failed to delete surplus pod"),
                }
            }
        }

        self.write_status(job, status, update).await
    }
}

/// Stamp one pod from a task template.
fn build_task_pod(job: &Job, task: &TaskSpec, index: i32) -> Pod {
    let mut pod = Pod {
        metadata: gangway_apis::ObjectMeta::namespaced(
            job.namespace(),
            &format!("{}-{}-{}", job.name(), task.name, index),
        ),
        spec: task.template.spec.clone(),
        status: Default::default(),
    };

    pod.metadata.labels = task.template.labels.clone();
    pod.metadata.annotations = task.template.annotations.clone();
    pod.metadata.annotations.insert(
        annotations::JOB_NAME_KEY.to_string(),
        job.name().to_string(),
    );
    pod.metadata.annotations.insert(
        annotations::TASK_SPEC_KEY.to_string(),
        task.name.to_string(),
    );
    pod.metadata.annotations.insert(
        annotations::GROUP_NAME_KEY.to_string(),
        job.name().to_string(),
    );
    pod.metadata.owner_references = vec![gangway_apis::OwnerReference {
        kind: "Job".to_string(),
        name: job.name().to_string(),
        controller: true,
    }];

    if pod.spec.scheduler_name.is_empty() {
        pod.spec.scheduler_name = job.spec.scheduler_name.clone();
    }
    pod
}

#[async_trait]
impl Controller for JobController {
    fn name(&self) -> &str {
        CONTROLLER_NAME
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("starting job controller");
        tokio::select! {
            _ = self.worker() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    self.queue.shut_down();
                }
            }
        }
        info!("job controller stopped");
    }
}
