//! The per-tick scheduling session.
//!
//! A session owns a deep snapshot of the cluster, hosts the plugins built
//! from the configured tiers, and exposes the transactional scheduling
//! operations. All mutations inside a session touch only the session's own
//! copy; effects reach the cluster when statements commit through the
//! cache.

use super::statement::Statement;
use super::types::*;
use super::{Event, EventHandler, Plugin};
use crate::cache::SchedulerCache;
use crate::conf::{Configuration, Tier};
use crate::error::SchedulerError;
use crate::metrics;
use gangway_apis::{
    ConditionStatus, PodGroupCondition, PodGroupConditionType, PodGroupPhase, PodGroupStatus,
};
use gangway_core::{
    allocated_status, JobId, JobInfo, NamespaceInfo, NodeInfo, QueueId, QueueInfo, Resource,
    TaskInfo, TaskStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Session {
    pub uid: String,

    pub(crate) cache: Arc<SchedulerCache>,

    /// Sum of all nodes' allocatable resources.
    pub total_resource: Resource,
    /// Pod-group statuses as they were when the session opened.
    pub(crate) pod_group_status: HashMap<JobId, PodGroupStatus>,

    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub node_list: Vec<String>,
    /// Names of nodes in a revocable zone.
    pub revocable_nodes: Vec<String>,
    pub queues: HashMap<QueueId, QueueInfo>,
    pub namespace_info: HashMap<String, NamespaceInfo>,

    pub tiers: Vec<Tier>,
    pub configurations: Vec<Configuration>,

    pub(crate) plugins: HashMap<String, Box<dyn Plugin>>,
    pub(crate) event_handlers: Vec<EventHandler>,

    pub(crate) job_order_fns: HashMap<String, JobOrderFn>,
    pub(crate) task_order_fns: HashMap<String, TaskOrderFn>,
    pub(crate) queue_order_fns: HashMap<String, QueueOrderFn>,
    pub(crate) namespace_order_fns: HashMap<String, NamespaceOrderFn>,
    pub(crate) cluster_order_fns: HashMap<String, ClusterOrderFn>,
    pub(crate) predicate_fns: HashMap<String, PredicateFn>,
    pub(crate) node_order_fns: HashMap<String, NodeOrderFn>,
    pub(crate) batch_node_order_fns: HashMap<String, BatchNodeOrderFn>,
    pub(crate) node_map_fns: HashMap<String, NodeMapFn>,
    pub(crate) node_reduce_fns: HashMap<String, NodeReduceFn>,
    pub(crate) preemptable_fns: HashMap<String, EvictableFn>,
    pub(crate) reclaimable_fns: HashMap<String, EvictableFn>,
    pub(crate) overused_fns: HashMap<String, OverUsedFn>,
    pub(crate) underused_fns: HashMap<String, UnderUsedResourceFn>,
    pub(crate) job_ready_fns: HashMap<String, ValidateFn>,
    pub(crate) job_pipelined_fns: HashMap<String, VoteFn>,
    pub(crate) job_valid_fns: HashMap<String, ValidateExFn>,
    pub(crate) job_enqueueable_fns: HashMap<String, VoteFn>,
    pub(crate) job_enqueued_fns: HashMap<String, JobEnqueuedFn>,
    pub(crate) job_starving_fns: HashMap<String, ValidateFn>,
    pub(crate) target_job_fns: HashMap<String, TargetJobFn>,
    pub(crate) reserved_nodes_fns: HashMap<String, ReservedNodesFn>,
    pub(crate) victim_tasks_fns: HashMap<String, VictimTasksFn>,
}

/// Open a session: snapshot the cache, run every configured plugin's
/// `on_session_open`, and drop jobs that fail validation.
pub fn open_session(
    cache: Arc<SchedulerCache>,
    tiers: Vec<Tier>,
    configurations: Vec<Configuration>,
) -> Session {
    let snapshot = cache.snapshot();

    let mut sess = Session {
        uid: uuid::Uuid::new_v4().to_string(),
        cache,
        total_resource: Resource::empty(),
        pod_group_status: HashMap::new(),
        jobs: snapshot.jobs,
        nodes: snapshot.nodes,
        node_list: snapshot.node_list,
        revocable_nodes: Vec::new(),
        queues: snapshot.queues,
        namespace_info: snapshot.namespace_info,
        tiers,
        configurations,
        plugins: HashMap::new(),
        event_handlers: Vec::new(),
        job_order_fns: HashMap::new(),
        task_order_fns: HashMap::new(),
        queue_order_fns: HashMap::new(),
        namespace_order_fns: HashMap::new(),
        cluster_order_fns: HashMap::new(),
        predicate_fns: HashMap::new(),
        node_order_fns: HashMap::new(),
        batch_node_order_fns: HashMap::new(),
        node_map_fns: HashMap::new(),
        node_reduce_fns: HashMap::new(),
        preemptable_fns: HashMap::new(),
        reclaimable_fns: HashMap::new(),
        overused_fns: HashMap::new(),
        underused_fns: HashMap::new(),
        job_ready_fns: HashMap::new(),
        job_pipelined_fns: HashMap::new(),
        job_valid_fns: HashMap::new(),
        job_enqueueable_fns: HashMap::new(),
        job_enqueued_fns: HashMap::new(),
        job_starving_fns: HashMap::new(),
        target_job_fns: HashMap::new(),
        reserved_nodes_fns: HashMap::new(),
        victim_tasks_fns: HashMap::new(),
    };

    for node in sess.nodes.values() {
        sess.total_resource.add(&node.allocatable);
        if !node.revocable_zone.is_empty() {
            sess.revocable_nodes.push(node.name.clone());
        }
    }

    for (id, job) in &sess.jobs {
        if let Some(pg) = &job.pod_group {
            sess.pod_group_status.insert(id.clone(), pg.status.clone());
        }
    }

    // Build the plugins of every tier and let them register callbacks.
    let mut plugins: HashMap<String, Box<dyn Plugin>> = HashMap::new();
    let tiers = sess.tiers.clone();
    for tier in &tiers {
        for opt in &tier.plugins {
            if plugins.contains_key(&opt.name) {
                continue;
            }
            match super::get_plugin_builder(&opt.name) {
                Some(builder) => {
                    let mut plugin = builder(opt.arguments.clone());
                    plugin.on_session_open(&mut sess);
                    plugins.insert(opt.name.clone(), plugin);
                }
                None => warn!(plugin = %opt.name, "no builder registered for plugin"),
            }
        }
    }
    sess.plugins = plugins;

    // Pre-validate jobs; invalid ones get an Unschedulable condition and
    // leave the working set.
    let job_ids: Vec<JobId> = sess.jobs.keys().cloned().collect();
    for id in job_ids {
        let verdict = match sess.jobs.get(&id) {
            Some(job) => sess.job_valid(job),
            None => None,
        };
        if let Some(result) = verdict {
            if !result.pass {
                let condition = PodGroupCondition {
                    condition_type: PodGroupConditionType::Unschedulable,
                    status: ConditionStatus::True,
                    transition_id: sess.uid.clone(),
                    last_transition_time: chrono::Utc::now(),
                    reason: result.reason,
                    message: result.message,
                };
                if let Err(err) = sess.update_pod_group_condition(&id, condition) {
                    warn!(job = %id, %err, "failed to update job condition");
                }
                sess.jobs.remove(&id);
            }
        }
    }

    info!(
        session = %sess.uid,
        jobs = sess.jobs.len(),
        queues = sess.queues.len(),
        "opened session"
    );
    sess
}

/// Close a session: run plugin close hooks, then push every pod-group
/// status delta back through the cache.
pub async fn close_session(mut sess: Session) {
    let mut plugins = std::mem::take(&mut sess.plugins);
    for plugin in plugins.values_mut() {
        plugin.on_session_close(&mut sess);
    }
    drop(plugins);

    let cache = Arc::clone(&sess.cache);
    for (id, job) in &sess.jobs {
        if job.pod_group.is_none() {
            continue;
        }
        let status = sess.job_status(job);
        let unchanged = sess
            .pod_group_status
            .get(id)
            .map(|old| *old == status)
            .unwrap_or(false);
        if unchanged {
            continue;
        }

        let mut updated = job.clone();
        if let Some(pg) = &mut updated.pod_group {
            pg.status = status;
        }
        if let Err(err) = cache.update_job_status(&updated, true).await {
            warn!(job = %id, %err, "failed to push job status");
        }
    }

    debug!(session = %sess.uid, "closed session");
}

impl Session {
    /// Phase and counts the job's pod-group should carry after this
    /// session.
    pub(crate) fn job_status(&self, job: &JobInfo) -> PodGroupStatus {
        let Some(pg) = &job.pod_group else {
            return PodGroupStatus::default();
        };
        let mut status = pg.status.clone();

        let unschedulable = status.conditions.iter().any(|c| {
            c.condition_type == PodGroupConditionType::Unschedulable
                && c.status == ConditionStatus::True
                && c.transition_id == self.uid
        });

        if job.count_in(TaskStatus::Running) > 0 && unschedulable {
            status.phase = PodGroupPhase::Unknown;
        } else {
            let allocated: usize = job
                .tasks
                .values()
                .filter(|t| allocated_status(t.status()) || t.status() == TaskStatus::Succeeded)
                .count();
            if allocated as i32 >= pg.spec.min_member {
                status.phase = PodGroupPhase::Running;
            } else if status.phase != PodGroupPhase::Inqueue {
                status.phase = PodGroupPhase::Pending;
            }
        }

        status.running = job.count_in(TaskStatus::Running) as i32;
        status.failed = job.count_in(TaskStatus::Failed) as i32;
        status.succeeded = job.count_in(TaskStatus::Succeeded) as i32;
        status
    }

    /// Record or replace a typed condition on the job's pod-group.
    pub fn update_pod_group_condition(
        &mut self,
        job_id: &str,
        condition: PodGroupCondition,
    ) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        let Some(pg) = &mut job.pod_group else {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        };

        match pg
            .status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition,
            None => pg.status.conditions.push(condition),
        }
        Ok(())
    }

    /// Record the freshest NUMA occupancy through the cache.
    pub fn update_scheduler_numa_info(
        &self,
        sets: &HashMap<String, gangway_core::ResNumaSets>,
    ) {
        self.cache.update_scheduler_numa_info(sets);
    }

    /// Bind the job's pod-group to a member cluster.
    pub async fn bind_pod_group(&self, job: &JobInfo, cluster: &str) -> Result<(), SchedulerError> {
        self.cache.bind_pod_group(job, cluster).await
    }

    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.event_handlers.push(handler);
    }

    pub(crate) fn fire_allocate_event(&self, task: &TaskInfo) {
        let event = Event { task: task.clone() };
        for handler in &self.event_handlers {
            if let Some(f) = &handler.allocate_func {
                f(&event);
            }
        }
    }

    pub(crate) fn fire_deallocate_event(&self, task: &TaskInfo) {
        let event = Event { task: task.clone() };
        for handler in &self.event_handlers {
            if let Some(f) = &handler.deallocate_func {
                f(&event);
            }
        }
    }

    /// Open a transactional scratchpad.
    pub fn statement(&self) -> Statement {
        Statement::new()
    }

    /// Allocate a task to a node and commit immediately. When the gang
    /// becomes ready, every allocated member is dispatched to binding.
    pub fn allocate(&mut self, task: &TaskInfo, node_name: &str) -> Result<(), SchedulerError> {
        let mut stmt = self.statement();
        stmt.allocate(self, task, node_name)?;

        let ready = self
            .jobs
            .get(&task.job)
            .map(|job| self.job_ready(job))
            .unwrap_or(false);
        if ready {
            stmt.commit(self)?;
            self.dispatch_allocated(&task.job.clone())?;
        } else {
            stmt.forget();
        }
        Ok(())
    }

    /// Pipeline a task onto a node whose resources are still being
    /// released. Session-local; nothing reaches the cluster.
    pub fn pipeline(&mut self, task: &TaskInfo, node_name: &str) -> Result<(), SchedulerError> {
        let mut stmt = self.statement();
        stmt.pipeline(self, task, node_name)?;
        stmt.forget();
        Ok(())
    }

    /// Evict a task and commit immediately.
    pub fn evict(&mut self, reclaimee: &TaskInfo, reason: &str) -> Result<(), SchedulerError> {
        let mut stmt = self.statement();
        stmt.evict(self, reclaimee, reason)?;
        stmt.commit(self)
    }

    /// Dispatch every still-Allocated task of a ready job to binding.
    pub(crate) fn dispatch_allocated(&mut self, job_id: &str) -> Result<(), SchedulerError> {
        let tasks: Vec<TaskInfo> = match self.jobs.get(job_id) {
            Some(job) => job
                .tasks_in(TaskStatus::Allocated)
                .into_iter()
                .cloned()
                .collect(),
            None => return Err(SchedulerError::JobNotFound(job_id.to_string())),
        };
        for task in tasks {
            self.dispatch(&task)?;
        }
        Ok(())
    }

    /// Hand an allocated task to the binding pipeline.
    pub(crate) fn dispatch(&mut self, task: &TaskInfo) -> Result<(), SchedulerError> {
        self.cache.add_bind_task(task)?;

        let job = self
            .jobs
            .get_mut(&task.job)
            .ok_or_else(|| SchedulerError::JobNotFound(task.job.clone()))?;
        job.update_task_status(&task.uid, TaskStatus::Binding)?;

        metrics::update_task_schedule_duration(
            (chrono::Utc::now() - task.pod.metadata.creation_timestamp).num_milliseconds() as f64
                / 1000.0,
        );
        Ok(())
    }
}
