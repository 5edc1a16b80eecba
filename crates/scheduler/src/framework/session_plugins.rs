//! Callback registration and tier-ordered composition.
//!
//! Plugins register callbacks under their own name during
//! `on_session_open`; dispatch walks the configured tiers in order and
//! invokes every plugin that has the callback enabled. Composition rules
//! per kind: comparators chain (first non-equal wins), predicates
//! short-circuit on the first error, scores sum, evictability intersects
//! within a tier, votes sum with the sign as the verdict.

use super::session::Session;
use super::types::*;
use crate::conf::{enabled, PluginOption, Tier};
use crate::error::SchedulerError;
use gangway_core::{
    JobId, JobInfo, NamespaceInfo, NodeInfo, QueueInfo, SiloClusterInfo, TaskId, TaskInfo,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

macro_rules! register_fn {
    ($method:ident, $map:ident, $ty:ty) => {
        pub fn $method(&mut self, plugin: &str, f: $ty) {
            self.$map.insert(plugin.to_string(), f);
        }
    };
}

impl Session {
    register_fn!(add_job_order_fn, job_order_fns, JobOrderFn);
    register_fn!(add_task_order_fn, task_order_fns, TaskOrderFn);
    register_fn!(add_queue_order_fn, queue_order_fns, QueueOrderFn);
    register_fn!(add_namespace_order_fn, namespace_order_fns, NamespaceOrderFn);
    register_fn!(add_cluster_order_fn, cluster_order_fns, ClusterOrderFn);
    register_fn!(add_predicate_fn, predicate_fns, PredicateFn);
    register_fn!(add_node_order_fn, node_order_fns, NodeOrderFn);
    register_fn!(add_batch_node_order_fn, batch_node_order_fns, BatchNodeOrderFn);
    register_fn!(add_node_map_fn, node_map_fns, NodeMapFn);
    register_fn!(add_node_reduce_fn, node_reduce_fns, NodeReduceFn);
    register_fn!(add_preemptable_fn, preemptable_fns, EvictableFn);
    register_fn!(add_reclaimable_fn, reclaimable_fns, EvictableFn);
    register_fn!(add_overused_fn, overused_fns, OverUsedFn);
    register_fn!(add_underused_resource_fn, underused_fns, UnderUsedResourceFn);
    register_fn!(add_job_ready_fn, job_ready_fns, ValidateFn);
    register_fn!(add_job_pipelined_fn, job_pipelined_fns, VoteFn);
    register_fn!(add_job_valid_fn, job_valid_fns, ValidateExFn);
    register_fn!(add_job_enqueueable_fn, job_enqueueable_fns, VoteFn);
    register_fn!(add_job_enqueued_fn, job_enqueued_fns, JobEnqueuedFn);
    register_fn!(add_job_starving_fn, job_starving_fns, ValidateFn);
    register_fn!(add_target_job_fn, target_job_fns, TargetJobFn);
    register_fn!(add_reserved_nodes_fn, reserved_nodes_fns, ReservedNodesFn);
    register_fn!(add_victim_tasks_fn, victim_tasks_fns, VictimTasksFn);

    fn walk_enabled<'a>(
        tiers: &'a [Tier],
        flag: impl Fn(&PluginOption) -> Option<bool> + 'a,
    ) -> impl Iterator<Item = &'a PluginOption> {
        tiers
            .iter()
            .flat_map(|tier| tier.plugins.iter())
            .filter(move |opt| enabled(flag(opt)))
    }

    /* Comparators */

    pub fn job_order_fn(&self, lhs: &JobInfo, rhs: &JobInfo) -> Ordering {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_job_order) {
            if let Some(f) = self.job_order_fns.get(&opt.name) {
                let order = f(lhs, rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        // Default: creation time, then UID, for stable ordering.
        lhs.creation_timestamp
            .cmp(&rhs.creation_timestamp)
            .then_with(|| lhs.uid.cmp(&rhs.uid))
    }

    pub fn task_order_fn(&self, lhs: &TaskInfo, rhs: &TaskInfo) -> Ordering {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_task_order) {
            if let Some(f) = self.task_order_fns.get(&opt.name) {
                let order = f(lhs, rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        lhs.uid.cmp(&rhs.uid)
    }

    pub fn queue_order_fn(&self, lhs: &QueueInfo, rhs: &QueueInfo) -> Ordering {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_queue_order) {
            if let Some(f) = self.queue_order_fns.get(&opt.name) {
                let order = f(lhs, rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        lhs.uid.cmp(&rhs.uid)
    }

    pub fn namespace_order_fn(&self, lhs: &NamespaceInfo, rhs: &NamespaceInfo) -> Ordering {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_namespace_order) {
            if let Some(f) = self.namespace_order_fns.get(&opt.name) {
                let order = f(lhs, rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        // Higher weight first by default.
        rhs.weight()
            .cmp(&lhs.weight())
            .then_with(|| lhs.name.cmp(&rhs.name))
    }

    pub fn cluster_order_fn(&self, lhs: &SiloClusterInfo, rhs: &SiloClusterInfo) -> Ordering {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_cluster_order) {
            if let Some(f) = self.cluster_order_fns.get(&opt.name) {
                let order = f(lhs, rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        lhs.uid.cmp(&rhs.uid)
    }

    /* Predicates and scoring */

    /// First predicate error stops the walk and fails the node.
    pub fn predicate_fn(&self, task: &TaskInfo, node: &NodeInfo) -> Result<(), SchedulerError> {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_predicate) {
            if let Some(f) = self.predicate_fns.get(&opt.name) {
                f(task, node)?;
            }
        }
        Ok(())
    }

    /// Sum of every enabled plugin's score for one node.
    pub fn node_order_fn(&self, task: &TaskInfo, node: &NodeInfo) -> Result<f64, SchedulerError> {
        let mut score = 0.0;
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_node_order) {
            if let Some(f) = self.node_order_fns.get(&opt.name) {
                score += f(task, node)?;
            }
            if let Some(f) = self.node_map_fns.get(&opt.name) {
                score += f(task, node)?;
            }
        }
        Ok(score)
    }

    /// Batch scores summed into a per-node map, then reduced.
    pub fn batch_node_order_fn(
        &self,
        task: &TaskInfo,
        nodes: &[&NodeInfo],
    ) -> Result<HashMap<String, f64>, SchedulerError> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_node_order) {
            if let Some(f) = self.batch_node_order_fns.get(&opt.name) {
                for (node, score) in f(task, nodes)? {
                    *scores.entry(node).or_insert(0.0) += score;
                }
            }
        }
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_node_order) {
            if let Some(f) = self.node_reduce_fns.get(&opt.name) {
                f(task, &mut scores)?;
            }
        }
        Ok(scores)
    }

    /* Evictability */

    fn evictable(
        &self,
        evictor: &TaskInfo,
        evictees: &[TaskInfo],
        fns: &HashMap<String, EvictableFn>,
        flag: impl Fn(&PluginOption) -> Option<bool> + Copy,
    ) -> Vec<TaskId> {
        for tier in &self.tiers {
            let mut victims: Option<HashSet<TaskId>> = None;
            let mut rejected = false;

            for opt in tier.plugins.iter().filter(|o| enabled(flag(o))) {
                let Some(f) = fns.get(&opt.name) else {
                    continue;
                };
                let (candidates, verdict) = f(evictor, evictees);
                match verdict {
                    Verdict::Abstain => continue,
                    Verdict::Reject => {
                        rejected = true;
                        break;
                    }
                    Verdict::Permit => {
                        if candidates.is_empty() {
                            rejected = true;
                            break;
                        }
                        let candidate_set: HashSet<TaskId> = candidates.into_iter().collect();
                        victims = Some(match victims {
                            None => candidate_set,
                            Some(current) => {
                                current.intersection(&candidate_set).cloned().collect()
                            }
                        });
                    }
                }
            }

            if rejected {
                return Vec::new();
            }
            if let Some(victims) = victims {
                return victims.into_iter().collect();
            }
            // Every plugin in this tier abstained; try the next tier.
        }
        Vec::new()
    }

    /// Victims the preemptor may evict inside its own queue.
    pub fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[TaskInfo]) -> Vec<TaskId> {
        self.evictable(preemptor, preemptees, &self.preemptable_fns, |o| {
            o.enabled_preemptable
        })
    }

    /// Victims the reclaimer may evict across queues.
    pub fn reclaimable(&self, reclaimer: &TaskInfo, reclaimees: &[TaskInfo]) -> Vec<TaskId> {
        self.evictable(reclaimer, reclaimees, &self.reclaimable_fns, |o| {
            o.enabled_reclaimable
        })
    }

    /* Job checks */

    /// Every enabled plugin must agree the job is ready.
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_job_ready) {
            if let Some(f) = self.job_ready_fns.get(&opt.name) {
                if !f(job) {
                    return false;
                }
            }
        }
        true
    }

    fn vote(
        &self,
        job: &JobInfo,
        fns: &HashMap<String, VoteFn>,
        flag: impl Fn(&PluginOption) -> Option<bool> + Copy,
    ) -> bool {
        let mut sum = 0;
        for opt in Self::walk_enabled(&self.tiers, flag) {
            if let Some(f) = fns.get(&opt.name) {
                sum += f(job);
            }
        }
        // The sign of the summed votes decides; a tie permits.
        sum >= 0
    }

    /// Whether the job may occupy released-but-not-yet-free resources.
    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        self.vote(job, &self.job_pipelined_fns, |o| o.enabled_job_pipelined)
    }

    /// Whether the job may enter its queue.
    pub fn job_enqueueable(&self, job: &JobInfo) -> bool {
        self.vote(job, &self.job_enqueueable_fns, |o| o.enabled_job_enqueueable)
    }

    /// Notify plugins that the job entered its queue.
    pub fn job_enqueued(&self, job: &JobInfo) {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_job_enqueued) {
            if let Some(f) = self.job_enqueued_fns.get(&opt.name) {
                f(job);
            }
        }
    }

    /// First failed validation wins; `None` means the job is valid.
    pub fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_job_valid) {
            if let Some(f) = self.job_valid_fns.get(&opt.name) {
                if let Some(result) = f(job) {
                    if !result.pass {
                        return Some(result);
                    }
                }
            }
        }
        None
    }

    /// A job is starving when every enabled plugin (at least one) says so.
    pub fn job_starving(&self, job: &JobInfo) -> bool {
        let mut any = false;
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_job_starving) {
            if let Some(f) = self.job_starving_fns.get(&opt.name) {
                if !f(job) {
                    return false;
                }
                any = true;
            }
        }
        any
    }

    /* Resource pressure */

    pub fn overused(&self, queue: &QueueInfo) -> bool {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_overused) {
            if let Some(f) = self.overused_fns.get(&opt.name) {
                if f(queue) {
                    return true;
                }
            }
        }
        false
    }

    /// Union of every plugin's under-used dimensions for the queue.
    pub fn underused_resources(&self, queue: &QueueInfo) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_underused) {
            if let Some(f) = self.underused_fns.get(&opt.name) {
                for name in f(queue) {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
        }
        out
    }

    /* Targeted preemption */

    pub fn target_job(&self, jobs: &[&JobInfo]) -> Option<JobId> {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_target_job) {
            if let Some(f) = self.target_job_fns.get(&opt.name) {
                if let Some(target) = f(jobs) {
                    return Some(target);
                }
            }
        }
        None
    }

    pub fn reserved_nodes(&self) {
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_reserved_nodes) {
            if let Some(f) = self.reserved_nodes_fns.get(&opt.name) {
                f();
            }
        }
    }

    /// Union of victim tasks nominated by plugins.
    pub fn victim_tasks(&self) -> Vec<TaskInfo> {
        let mut victims: Vec<TaskInfo> = Vec::new();
        for opt in Self::walk_enabled(&self.tiers, |o| o.enabled_victim) {
            if let Some(f) = self.victim_tasks_fns.get(&opt.name) {
                for task in f() {
                    if !victims.iter().any(|v| v.uid == task.uid) {
                        victims.push(task);
                    }
                }
            }
        }
        victims
    }
}
