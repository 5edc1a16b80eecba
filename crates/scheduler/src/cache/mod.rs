//! The scheduler cache: an event-sourced mirror of cluster state.
//!
//! All mutation happens under one coarse lock; consumers get consistent
//! deep-cloned snapshots. External effects (binding, eviction, status
//! pushback, volumes) go through collaborator traits so the storage plane
//! stays out of process.

pub mod event_handlers;
pub mod fakes;
pub mod sharding;

use crate::error::SchedulerError;
use crate::metrics;
use async_trait::async_trait;
use gangway_apis::{
    EventRecorder, EventType, Node, Numatopology, Pod, PodGroup, PriorityClass, Queue,
    ResourceQuota, WatchEvent,
};
use gangway_core::{
    ClusterInfo, JobId, JobInfo, NamespaceCollection, NodeInfo, QueueId, QueueInfo, ResNumaSets,
    TaskInfo, TaskStatus,
};
use parking_lot::{Mutex, RwLock};
use sharding::ShardRing;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

/// Maximum attempts when pushing job status back to the store.
const STATUS_UPDATE_RETRIES: u32 = 5;

/// Batch size of the binding pipeline.
const BIND_BATCH: usize = 64;

/// Scheduler name from the environment, with the stock default.
pub fn scheduler_name_from_env() -> String {
    std::env::var("GANGWAY_SCHEDULER_NAME").unwrap_or_else(|_| "gangway".to_string())
}

/// Typed change notifications consumed by the cache.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Pod(WatchEvent<Pod>),
    Node(WatchEvent<Node>),
    PodGroup(WatchEvent<PodGroup>),
    Queue(WatchEvent<Queue>),
    PriorityClass(WatchEvent<PriorityClass>),
    ResourceQuota(WatchEvent<ResourceQuota>),
    Numatopology(WatchEvent<Numatopology>),
    /// The initial list of every watched type has been delivered.
    SyncDone,
}

/// Opaque volume placement handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodVolumes;

/// Binds a batch of tasks to their assigned nodes. Returns the subset that
/// failed; an empty return means the whole batch succeeded.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, tasks: Vec<TaskInfo>) -> Vec<TaskInfo>;
}

/// Evicts one pod from its node.
#[async_trait]
pub trait Evictor: Send + Sync {
    async fn evict(&self, pod: &Pod, reason: &str) -> Result<(), SchedulerError>;
}

/// Pushes status updates back to the resource store.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_pod_group(&self, pg: &PodGroup) -> Result<PodGroup, SchedulerError>;
}

/// Delegated volume scheduling.
pub trait VolumeBinder: Send + Sync {
    fn get_pod_volumes(&self, task: &TaskInfo) -> Result<PodVolumes, SchedulerError>;
    fn allocate_volumes(
        &self,
        task: &TaskInfo,
        hostname: &str,
        volumes: &PodVolumes,
    ) -> Result<(), SchedulerError>;
    fn bind_volumes(&self, task: &TaskInfo, volumes: &PodVolumes) -> Result<(), SchedulerError>;
}

/// Annotates a pod-group with the member cluster it was dispatched to.
#[async_trait]
pub trait BatchBinder: Send + Sync {
    async fn bind(&self, job: &JobInfo, cluster: &str) -> Result<(), SchedulerError>;
}

/// External collaborators wired into the cache.
pub struct CacheCollaborators {
    pub binder: Arc<dyn Binder>,
    pub evictor: Arc<dyn Evictor>,
    pub status_updater: Arc<dyn StatusUpdater>,
    pub volume_binder: Arc<dyn VolumeBinder>,
    pub batch_binder: Arc<dyn BatchBinder>,
    pub recorder: Arc<dyn EventRecorder>,
}

pub(crate) struct CacheState {
    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub node_list: Vec<String>,
    pub queues: HashMap<QueueId, QueueInfo>,
    pub priority_classes: HashMap<String, PriorityClass>,
    pub default_priority: i32,
    pub default_priority_class: Option<String>,
    pub namespace_collections: HashMap<String, NamespaceCollection>,
    pub synced: bool,
}

impl CacheState {
    fn new() -> Self {
        CacheState {
            jobs: HashMap::new(),
            nodes: HashMap::new(),
            node_list: Vec::new(),
            queues: HashMap::new(),
            priority_classes: HashMap::new(),
            default_priority: 0,
            default_priority_class: None,
            namespace_collections: HashMap::new(),
            synced: false,
        }
    }
}

/// Event-consuming mirror of cluster objects, the single shared mutable
/// state of the scheduler.
pub struct SchedulerCache {
    pub(crate) scheduler_name: String,
    pub(crate) default_queue: String,

    pub(crate) my_pod_name: String,
    pub(crate) shard: Option<ShardRing>,

    pub(crate) state: RwLock<CacheState>,
    sync_notify: Notify,

    pub(crate) binder: Arc<dyn Binder>,
    pub(crate) evictor: Arc<dyn Evictor>,
    pub(crate) status_updater: Arc<dyn StatusUpdater>,
    pub(crate) volume_binder: Arc<dyn VolumeBinder>,
    pub(crate) batch_binder: Arc<dyn BatchBinder>,
    pub(crate) recorder: Arc<dyn EventRecorder>,

    bind_tx: mpsc::UnboundedSender<TaskInfo>,
    bind_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskInfo>>>,
}

impl SchedulerCache {
    pub fn new(scheduler_name: &str, default_queue: &str, collab: CacheCollaborators) -> Self {
        let (my_pod_name, shard) = sharding::multi_scheduler_info();
        let (bind_tx, bind_rx) = mpsc::unbounded_channel();
        SchedulerCache {
            scheduler_name: scheduler_name.to_string(),
            default_queue: default_queue.to_string(),
            my_pod_name,
            shard,
            state: RwLock::new(CacheState::new()),
            sync_notify: Notify::new(),
            binder: collab.binder,
            evictor: collab.evictor,
            status_updater: collab.status_updater,
            volume_binder: collab.volume_binder,
            batch_binder: collab.batch_binder,
            recorder: collab.recorder,
            bind_tx,
            bind_rx: Mutex::new(Some(bind_rx)),
        }
    }

    /// Override the sharding membership, mainly for tests.
    pub fn set_sharding(&mut self, my_pod_name: &str, ring: Option<ShardRing>) {
        self.my_pod_name = my_pod_name.to_string();
        self.shard = ring;
    }

    /// Consume watch events and service the binding pipeline until the stop
    /// channel flips.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ClusterEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        Arc::clone(&self).spawn_bind_worker(stop.clone());
        info!(scheduler = %self.scheduler_name, "scheduler cache running");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => return,
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Dispatch one typed event to its handler.
    pub fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Pod(WatchEvent::Added(pod)) => self.add_pod(&pod),
            ClusterEvent::Pod(WatchEvent::Updated { old, new }) => self.update_pod(&old, &new),
            ClusterEvent::Pod(WatchEvent::Deleted(pod)) => self.delete_pod(&pod),
            ClusterEvent::Node(WatchEvent::Added(node)) => self.add_node(&node),
            ClusterEvent::Node(WatchEvent::Updated { new, .. }) => self.update_node(&new),
            ClusterEvent::Node(WatchEvent::Deleted(node)) => self.delete_node(&node),
            ClusterEvent::PodGroup(WatchEvent::Added(pg)) => self.add_pod_group(&pg),
            ClusterEvent::PodGroup(WatchEvent::Updated { old, new }) => {
                self.update_pod_group(&old, &new)
            }
            ClusterEvent::PodGroup(WatchEvent::Deleted(pg)) => self.delete_pod_group(&pg),
            ClusterEvent::Queue(WatchEvent::Added(q)) => self.add_queue(&q),
            ClusterEvent::Queue(WatchEvent::Updated { old, new }) => self.update_queue(&old, &new),
            ClusterEvent::Queue(WatchEvent::Deleted(q)) => self.delete_queue(&q),
            ClusterEvent::PriorityClass(WatchEvent::Added(pc)) => self.add_priority_class(&pc),
            ClusterEvent::PriorityClass(WatchEvent::Updated { old, new }) => {
                self.update_priority_class(&old, &new)
            }
            ClusterEvent::PriorityClass(WatchEvent::Deleted(pc)) => {
                self.delete_priority_class(&pc)
            }
            ClusterEvent::ResourceQuota(WatchEvent::Added(quota)) => {
                self.add_resource_quota(&quota)
            }
            ClusterEvent::ResourceQuota(WatchEvent::Updated { new, .. }) => {
                self.update_resource_quota(&new)
            }
            ClusterEvent::ResourceQuota(WatchEvent::Deleted(quota)) => {
                self.delete_resource_quota(&quota)
            }
            ClusterEvent::Numatopology(WatchEvent::Added(nt)) => self.add_numa_info(&nt),
            ClusterEvent::Numatopology(WatchEvent::Updated { new, .. }) => {
                self.update_numa_info(&new)
            }
            ClusterEvent::Numatopology(WatchEvent::Deleted(nt)) => self.delete_numa_info(&nt),
            ClusterEvent::SyncDone => {
                self.state.write().synced = true;
                self.sync_notify.notify_waiters();
                info!("initial cache sync complete");
            }
        }
    }

    /// Block until the initial list has been delivered. Returns false when
    /// stopped first.
    pub async fn wait_for_cache_sync(&self, mut stop: watch::Receiver<bool>) -> bool {
        loop {
            if self.state.read().synced {
                return true;
            }
            tokio::select! {
                _ = self.sync_notify.notified() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Deep clone the whole cache under the lock. The result aliases
    /// nothing: later cache mutations are invisible to the snapshot.
    pub fn snapshot(&self) -> ClusterInfo {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let mut info = ClusterInfo {
            nodes: state.nodes.clone(),
            node_list: state.node_list.clone(),
            queues: state.queues.clone(),
            ..Default::default()
        };

        for (name, collection) in state.namespace_collections.iter_mut() {
            info.namespace_info.insert(name.clone(), collection.snapshot());
        }

        for (job_id, job) in &state.jobs {
            let Some(pg) = &job.pod_group else {
                debug!(job = %job_id, "job has no pod group yet, skipping in snapshot");
                continue;
            };
            let mut cloned = job.clone();
            cloned.priority = state.default_priority;
            if let Some(pc) = state.priority_classes.get(&pg.spec.priority_class_name) {
                cloned.priority = pc.value;
            }
            info.jobs.insert(job_id.clone(), cloned);
        }

        info
    }

    /// Hand a task to the binding pipeline: mark it Binding in the cache,
    /// account it on its node, and enqueue the bind operation. Returns
    /// immediately.
    pub fn add_bind_task(&self, task_info: &TaskInfo) -> Result<(), SchedulerError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(&task_info.job)
            .ok_or_else(|| SchedulerError::JobNotFound(task_info.job.clone()))?;

        let prev = {
            let task = job.tasks.get_mut(&task_info.uid).ok_or_else(|| {
                SchedulerError::Bind(format!(
                    "task {} not found in job {}",
                    task_info.uid, task_info.job
                ))
            })?;
            let prev = task.tx.clone();
            task.tx.node_name = task_info.node_name().to_string();
            task.numa_info = task_info.numa_info.clone();
            prev
        };
        if prev.status == TaskStatus::Pending {
            job.update_task_status(&task_info.uid, TaskStatus::Allocated)?;
        }
        job.update_task_status(&task_info.uid, TaskStatus::Binding)?;

        let bound_task = job.tasks[&task_info.uid].clone();
        let node = state
            .nodes
            .entry(task_info.node_name().to_string())
            .or_insert_with(|| NodeInfo::placeholder(task_info.node_name()));
        if let Err(err) = node.add_task(&bound_task) {
            // Roll the status back; the node is out of sync with reality.
            node.state = gangway_core::NodeState::not_ready("OutOfSync");
            if let Some(job) = state.jobs.get_mut(&task_info.job) {
                let _ = job.restore_task_context(&task_info.uid, prev);
            }
            return Err(err.into());
        }

        self.bind_tx
            .send(bound_task)
            .map_err(|e| SchedulerError::Bind(e.to_string()))?;
        Ok(())
    }

    /// Drain the bind queue in batches. Successful binds go to Bound;
    /// failed ones roll back to Allocated and are requeued for a retry.
    pub fn spawn_bind_worker(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let Some(mut rx) = self.bind_rx.lock().take() else {
            warn!("bind worker already running");
            return;
        };
        let cache = self;

        tokio::spawn(async move {
            loop {
                let mut batch = Vec::with_capacity(BIND_BATCH);
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => batch.push(task),
                        None => return,
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            return;
                        }
                        continue;
                    }
                }
                while batch.len() < BIND_BATCH {
                    match rx.try_recv() {
                        Ok(task) => batch.push(task),
                        Err(_) => break,
                    }
                }

                cache.process_bind_batch(batch).await;
            }
        });
    }

    async fn process_bind_batch(&self, batch: Vec<TaskInfo>) {
        let failed = self.binder.bind(batch.clone()).await;
        let failed_uids: Vec<&str> = failed.iter().map(|t| t.uid.as_str()).collect();

        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            for task in &batch {
                if failed_uids.contains(&task.uid.as_str()) {
                    continue;
                }
                if let Some(job) = state.jobs.get_mut(&task.job) {
                    if let Err(err) = job.update_task_status(&task.uid, TaskStatus::Bound) {
                        warn!(task = %task.uid, %err, "cannot mark task bound");
                        continue;
                    }
                    let bound = job.tasks[&task.uid].clone();
                    if let Some(node) = state.nodes.get_mut(task.node_name()) {
                        let _ = node.update_task(&bound);
                    }
                    metrics::update_task_schedule_duration(
                        (chrono::Utc::now() - task.pod.metadata.creation_timestamp)
                            .num_milliseconds() as f64
                            / 1000.0,
                    );
                }
            }

            for task in &failed {
                warn!(task = %task.uid, node = task.node_name(), "bind failed, retrying");
                if let Some(job) = state.jobs.get_mut(&task.job) {
                    if let Err(err) = job.update_task_status(&task.uid, TaskStatus::Allocated) {
                        warn!(task = %task.uid, %err, "cannot roll bind failure back");
                        continue;
                    }
                    let rolled = job.tasks[&task.uid].clone();
                    if let Some(node) = state.nodes.get_mut(task.node_name()) {
                        let _ = node.update_task(&rolled);
                    }
                }
                self.recorder.event(
                    &format!("{}/{}", task.namespace, task.name),
                    EventType::Warning,
                    "FailedBinding",
                    "binder rejected the task",
                );
            }
        }

        if !failed.is_empty() {
            // Back off briefly, then requeue the failed subset.
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut guard = self.state.write();
            let state = &mut *guard;
            for task in failed {
                if let Some(job) = state.jobs.get_mut(&task.job) {
                    if job.update_task_status(&task.uid, TaskStatus::Binding).is_ok() {
                        let retry = job.tasks[&task.uid].clone();
                        if let Some(node) = state.nodes.get_mut(task.node_name()) {
                            let _ = node.update_task(&retry);
                        }
                        let _ = self.bind_tx.send(retry);
                    }
                }
            }
        }
    }

    fn evict_internal(
        &self,
        task_info: &TaskInfo,
        reason: &str,
        release_now: bool,
    ) -> Result<(), SchedulerError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(&task_info.job)
            .ok_or_else(|| SchedulerError::JobNotFound(task_info.job.clone()))?;
        job.update_task_status(&task_info.uid, TaskStatus::Releasing)?;
        let releasing = job.tasks[&task_info.uid].clone();

        if let Some(node) = state.nodes.get_mut(task_info.node_name()) {
            node.update_task(&releasing)?;
            if release_now {
                // Hand the resources to the successor at once; the pod's
                // eventual deletion is then a no-op on the node's books.
                let _ = node.remove_task(&task_info.uid);
            }
        }

        self.recorder.event(
            &format!("{}/{}", task_info.namespace, task_info.name),
            EventType::Normal,
            "Evict",
            reason,
        );

        let evictor = Arc::clone(&self.evictor);
        let pod = releasing.pod.clone();
        let reason = reason.to_string();
        tokio::spawn(async move {
            if let Err(err) = evictor.evict(&pod, &reason).await {
                error!(pod = %pod.metadata.key(), %err, "eviction failed");
            }
        });

        Ok(())
    }

    /// Evict a task: mark it Releasing in the cache and fire the evictor.
    pub fn evict(&self, task_info: &TaskInfo, reason: &str) -> Result<(), SchedulerError> {
        self.evict_internal(task_info, reason, false)
    }

    /// Evict a task and free its resources on the node immediately, so a
    /// reclaiming task can bind against them in the same cycle.
    pub fn evict_and_release(
        &self,
        task_info: &TaskInfo,
        reason: &str,
    ) -> Result<(), SchedulerError> {
        self.evict_internal(task_info, reason, true)
    }

    /// Annotate the pod-group with its target cluster.
    pub async fn bind_pod_group(&self, job: &JobInfo, cluster: &str) -> Result<(), SchedulerError> {
        self.batch_binder.bind(job, cluster).await
    }

    /// Push the job's pod-group status to the store, retrying transient
    /// failures with exponential backoff.
    pub async fn update_job_status(
        &self,
        job: &JobInfo,
        update_pg: bool,
    ) -> Result<(), SchedulerError> {
        self.record_job_status_event(job);

        if !update_pg {
            return Ok(());
        }
        let Some(pg) = &job.pod_group else {
            return Ok(());
        };

        let mut backoff = Duration::from_millis(100);
        let mut last_err = None;
        for attempt in 1..=STATUS_UPDATE_RETRIES {
            match self.status_updater.update_pod_group(pg).await {
                Ok(updated) => {
                    let mut state = self.state.write();
                    if let Some(cached) = state.jobs.get_mut(&job.uid) {
                        cached.set_pod_group(updated);
                    }
                    return Ok(());
                }
                Err(err) => {
                    debug!(job = %job.uid, attempt, %err, "pod group status update failed");
                    last_err = Some(err);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            SchedulerError::StatusUpdate("status update retries exhausted".to_string())
        }))
    }

    /// Surface scheduling outcomes as user-visible events.
    pub fn record_job_status_event(&self, job: &JobInfo) {
        if !job.ready() {
            self.recorder.event(
                &job.uid,
                EventType::Warning,
                "PodGroupNotReady",
                &job.fit_error(),
            );
        }
        for task in job.tasks_in(TaskStatus::Pending) {
            let (reason, message) = job.task_scheduling_reason(&task.uid);
            if reason.is_empty() {
                continue;
            }
            self.recorder.event(
                &format!("{}/{}", task.namespace, task.name),
                EventType::Warning,
                &reason,
                &message,
            );
        }
    }

    /// Record the freshest NUMA-occupancy decisions on the nodes.
    pub fn update_scheduler_numa_info(&self, allocated_sets: &HashMap<String, ResNumaSets>) {
        let mut state = self.state.write();
        for (node_name, sets) in allocated_sets {
            let Some(node) = state.nodes.get_mut(node_name) else {
                continue;
            };
            if let Some(numa) = &mut node.numa_info {
                numa.allocate(sets);
            }
        }
    }

    /// Current task status in the cache, for assertions and debugging.
    pub fn task_status(&self, job_id: &str, task_uid: &str) -> Option<TaskStatus> {
        let state = self.state.read();
        state
            .jobs
            .get(job_id)
            .and_then(|job| job.tasks.get(task_uid))
            .map(|t| t.status())
    }

    /// Add a prebuilt job to the cache, as test setups do.
    pub fn add_job_info(&self, job: JobInfo) {
        let mut state = self.state.write();
        state.jobs.insert(job.uid.clone(), job);
    }

    pub fn queue_info(&self, queue_id: &QueueId) -> Option<QueueInfo> {
        self.state.read().queues.get(queue_id).cloned()
    }
}
