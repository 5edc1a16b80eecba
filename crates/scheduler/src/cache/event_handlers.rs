//! Event handlers: one per resource kind and change type. Every handler
//! takes the coarse cache lock for the duration of its mutation.

use super::{sharding, CacheState, SchedulerCache};
use gangway_apis::{Node, Numatopology, Pod, PodGroup, PriorityClass, Queue, ResourceQuota};
use gangway_core::{
    job_id_of, DomainError, JobInfo, NamespaceCollection, NodeInfo, NodeState, NumaChangeFlag,
    NumaTopoInfo, QueueInfo, TaskInfo, TaskStatus,
};
use tracing::{debug, error, warn};

fn is_terminated(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Succeeded | TaskStatus::Failed)
}

fn job_terminated(job: &JobInfo) -> bool {
    job.pod_group.is_none() && job.tasks.is_empty()
}

impl SchedulerCache {
    fn responsible_for_pod(&self, pod: &Pod) -> bool {
        sharding::responsible_for_pod(
            pod,
            &self.scheduler_name,
            &self.my_pod_name,
            self.shard.as_ref(),
        )
    }

    /* Pod and task handling */

    fn add_task_to_state(state: &mut CacheState, task: TaskInfo) -> Result<(), DomainError> {
        if !task.node_name().is_empty() {
            let node = state
                .nodes
                .entry(task.node_name().to_string())
                .or_insert_with(|| NodeInfo::placeholder(task.node_name()));

            if !is_terminated(task.status()) {
                if let Err(err) = node.add_task(&task) {
                    if matches!(err, DomainError::AllocateFail { .. }) {
                        node.state = NodeState::not_ready("OutOfSync");
                    }
                    return Err(err);
                }
            } else {
                debug!(task = %task.uid, status = %task.status(), "terminated task not accounted on node");
            }
        }

        if !task.job.is_empty() {
            state
                .jobs
                .entry(task.job.clone())
                .or_insert_with(|| JobInfo::new(&task.job))
                .add_task_info(task);
        }

        Ok(())
    }

    fn delete_task_from_state(state: &mut CacheState, task: &TaskInfo) -> Result<(), DomainError> {
        let mut job_err = None;
        if !task.job.is_empty() {
            match state.jobs.get_mut(&task.job) {
                Some(job) => {
                    if let Err(err) = job.delete_task_info(&task.uid) {
                        job_err = Some(err);
                    }
                }
                None => {
                    job_err = Some(DomainError::TaskNotFound {
                        task: task.uid.clone(),
                        job: task.job.clone(),
                    })
                }
            }
        }

        if !task.node_name().is_empty() {
            if let Some(node) = state.nodes.get_mut(task.node_name()) {
                match node.remove_task(&task.uid) {
                    Ok(_) => {}
                    // Routine after a reclaim eviction already dropped it.
                    Err(DomainError::TaskNotOnNode { .. }) => {
                        debug!(task = %task.uid, "task already off its node");
                    }
                    Err(err) => warn!(task = %task.uid, %err, "task not removed from node"),
                }
            }
        }

        match job_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the pod is already allocated in the cache.
    fn allocated_pod_in_cache(state: &CacheState, pod: &Pod) -> bool {
        let job_id = job_id_of(pod);
        state
            .jobs
            .get(&job_id)
            .and_then(|job| job.tasks.get(&pod.metadata.uid))
            .map(|t| gangway_core::allocated_status(t.status()))
            .unwrap_or(false)
    }

    pub fn add_pod(&self, pod: &Pod) {
        if !self.responsible_for_pod(pod) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        let task = TaskInfo::new(pod);
        if let Err(err) = Self::add_task_to_state(state, task) {
            error!(pod = %pod.metadata.key(), %err, "failed to add pod to cache");
            return;
        }
        debug!(pod = %pod.metadata.key(), "added pod to cache");
    }

    pub fn update_pod(&self, old: &Pod, new: &Pod) {
        if !self.responsible_for_pod(new) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        // An allocated task whose update lost the node assignment is a
        // stale echo; keep our view.
        if Self::allocated_pod_in_cache(state, new) && new.spec.node_name.is_empty() {
            debug!(pod = %new.metadata.key(), "ignoring stale update for allocated pod");
            return;
        }

        let old_task = TaskInfo::new(old);
        if let Err(err) = Self::delete_task_from_state(state, &old_task) {
            warn!(pod = %old.metadata.key(), %err, "stale task not deleted on update");
        }

        // Deletion clears owner references; keep the old ones so sharding
        // and ownership stay stable.
        let mut new = new.clone();
        if new.metadata.owner_references.is_empty() {
            new.metadata.owner_references = old.metadata.owner_references.clone();
        }

        if let Err(err) = Self::add_task_to_state(state, TaskInfo::new(&new)) {
            error!(pod = %new.metadata.key(), %err, "failed to re-add updated pod");
        }
    }

    pub fn delete_pod(&self, pod: &Pod) {
        if !self.responsible_for_pod(pod) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        let incoming = TaskInfo::new(pod);
        // Prefer the cached copy: it carries the in-flight transaction
        // state (e.g. Binding) that the stored pod does not.
        let task = state
            .jobs
            .get(&incoming.job)
            .and_then(|job| job.tasks.get(&incoming.uid))
            .cloned()
            .unwrap_or(incoming);

        if let Err(err) = Self::delete_task_from_state(state, &task) {
            warn!(pod = %pod.metadata.key(), %err, "failed to delete task");
        }

        if let Some(job) = state.jobs.get(&task.job) {
            if job_terminated(job) {
                state.jobs.remove(&task.job);
            }
        }
        debug!(pod = %pod.metadata.key(), "deleted pod from cache");
    }

    /* Node handling */

    pub fn add_node(&self, node: &Node) {
        if !sharding::responsible_for_node(node.name(), &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        match state.nodes.get_mut(node.name()) {
            Some(existing) => existing.set_node(node),
            None => {
                state
                    .nodes
                    .insert(node.name().to_string(), NodeInfo::new(node));
            }
        }
        if !state.node_list.iter().any(|n| n == node.name()) {
            state.node_list.push(node.name().to_string());
        }
    }

    pub fn update_node(&self, node: &Node) {
        if !sharding::responsible_for_node(node.name(), &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        match state.nodes.get_mut(node.name()) {
            Some(existing) => existing.set_node(node),
            None => error!(node = node.name(), "update for unknown node"),
        }
    }

    pub fn delete_node(&self, node: &Node) {
        if !sharding::responsible_for_node(node.name(), &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.nodes.remove(node.name()).is_none() {
            error!(node = node.name(), "delete for unknown node");
            return;
        }
        state.node_list.retain(|n| n != node.name());
    }

    /* PodGroup handling */

    fn set_pod_group_in_state(&self, state: &mut CacheState, pg: &PodGroup) {
        let job_id = format!("{}/{}", pg.namespace(), pg.name());
        let job = state
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::new(&job_id));
        job.set_pod_group(pg.clone());
        if pg.spec.queue.is_empty() {
            job.queue = self.default_queue.clone();
        }
    }

    pub fn add_pod_group(&self, pg: &PodGroup) {
        if !sharding::responsible_for_pod_group(pg, &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        let mut guard = self.state.write();
        self.set_pod_group_in_state(&mut guard, pg);
        debug!(pod_group = %pg.metadata.key(), "added pod group to cache");
    }

    pub fn update_pod_group(&self, old: &PodGroup, new: &PodGroup) {
        if !sharding::responsible_for_pod_group(new, &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        let mut guard = self.state.write();
        self.set_pod_group_in_state(&mut guard, new);
    }

    pub fn delete_pod_group(&self, pg: &PodGroup) {
        if !sharding::responsible_for_pod_group(pg, &self.my_pod_name, self.shard.as_ref()) {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        let job_id = format!("{}/{}", pg.namespace(), pg.name());
        match state.jobs.get_mut(&job_id) {
            Some(job) => {
                job.unset_pod_group();
                state.jobs.remove(&job_id);
            }
            None => error!(job = %job_id, "delete for unknown pod group"),
        }
    }

    /* Queue handling */

    pub fn add_queue(&self, queue: &Queue) {
        let mut state = self.state.write();
        let qi = QueueInfo::new(queue.clone());
        state.queues.insert(qi.uid.clone(), qi);
    }

    pub fn update_queue(&self, old: &Queue, new: &Queue) {
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        self.add_queue(new);
    }

    pub fn delete_queue(&self, queue: &Queue) {
        let mut state = self.state.write();
        state.queues.remove(queue.name());
    }

    /* PriorityClass handling */

    pub fn add_priority_class(&self, pc: &PriorityClass) {
        let mut state = self.state.write();
        Self::add_priority_class_to_state(&mut state, pc);
    }

    fn add_priority_class_to_state(state: &mut CacheState, pc: &PriorityClass) {
        if pc.global_default {
            if let Some(existing) = &state.default_priority_class {
                if existing != pc.name() {
                    error!(
                        old = existing.as_str(),
                        new = pc.name(),
                        "replacing default priority class"
                    );
                }
            }
            state.default_priority_class = Some(pc.name().to_string());
            state.default_priority = pc.value;
        }
        state
            .priority_classes
            .insert(pc.name().to_string(), pc.clone());
    }

    pub fn update_priority_class(&self, old: &PriorityClass, new: &PriorityClass) {
        let mut state = self.state.write();
        Self::delete_priority_class_from_state(&mut state, old);
        Self::add_priority_class_to_state(&mut state, new);
    }

    pub fn delete_priority_class(&self, pc: &PriorityClass) {
        let mut state = self.state.write();
        Self::delete_priority_class_from_state(&mut state, pc);
    }

    fn delete_priority_class_from_state(state: &mut CacheState, pc: &PriorityClass) {
        if pc.global_default {
            state.default_priority_class = None;
            state.default_priority = 0;
        }
        state.priority_classes.remove(pc.name());
    }

    /* ResourceQuota handling */

    pub fn add_resource_quota(&self, quota: &ResourceQuota) {
        self.update_resource_quota(quota);
    }

    pub fn update_resource_quota(&self, quota: &ResourceQuota) {
        let mut state = self.state.write();
        state
            .namespace_collections
            .entry(quota.namespace().to_string())
            .or_insert_with(|| NamespaceCollection::new(quota.namespace()))
            .update(quota);
    }

    pub fn delete_resource_quota(&self, quota: &ResourceQuota) {
        let mut state = self.state.write();
        if let Some(collection) = state.namespace_collections.get_mut(quota.namespace()) {
            collection.delete(quota);
        }
    }

    /* NUMA topology handling */

    pub fn add_numa_info(&self, nt: &Numatopology) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let node = state
            .nodes
            .entry(nt.name().to_string())
            .or_insert_with(|| NodeInfo::placeholder(nt.name()));

        let fresh = NumaTopoInfo::from_object(nt);
        node.numa_chg_flag = match &node.numa_info {
            None => NumaChangeFlag::More,
            Some(current) => {
                if current.compare(&fresh) {
                    NumaChangeFlag::More
                } else {
                    NumaChangeFlag::Less
                }
            }
        };
        node.numa_info = Some(fresh);
        debug!(node = nt.name(), flag = ?node.numa_chg_flag, "numa topology updated");
    }

    pub fn update_numa_info(&self, nt: &Numatopology) {
        self.add_numa_info(nt);
    }

    pub fn delete_numa_info(&self, nt: &Numatopology) {
        let mut state = self.state.write();
        if let Some(node) = state.nodes.get_mut(nt.name()) {
            node.numa_info = None;
            node.numa_chg_flag = NumaChangeFlag::Reset;
        }
    }
}
