//! Preempt: make room for starving jobs inside their own queue.
//!
//! For every starving job's pending task, candidate victims are the
//! running tasks of lower-priority jobs in the same queue. The minimum
//! victim set whose release lets the preemptor fit is evicted, the
//! preemptor is pipelined onto the node, and the whole batch commits or
//! discards atomically.

use super::util::{pick_best, predicate_nodes, prioritize_nodes};
use crate::framework::{Action, Session, Statement};
use gangway_core::{JobId, QueueId, TaskInfo, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const PREEMPT: &str = "preempt";

pub struct Preempt;

impl Action for Preempt {
    fn name(&self) -> &str {
        PREEMPT
    }

    fn execute(&self, sess: &mut Session) {
        debug!("enter preempt");

        let mut starving: HashMap<QueueId, Vec<JobId>> = HashMap::new();
        for (id, job) in &sess.jobs {
            if job.is_pending() || sess.job_valid(job).is_some() {
                continue;
            }
            if !sess.queues.contains_key(&job.queue) {
                continue;
            }
            if sess.job_starving(job) {
                starving.entry(job.queue.clone()).or_default().push(id.clone());
            }
        }

        for (queue_id, mut job_ids) in starving {
            while let Some(ji) = pick_best(&job_ids, |a, b| {
                match (sess.jobs.get(a), sess.jobs.get(b)) {
                    (Some(ja), Some(jb)) => sess.job_order_fn(ja, jb) == Ordering::Less,
                    _ => false,
                }
            }) {
                let job_id = job_ids.remove(ji);

                let mut tasks: Vec<TaskInfo> = match sess.jobs.get(&job_id) {
                    Some(job) => job
                        .tasks_in(TaskStatus::Pending)
                        .into_iter()
                        .cloned()
                        .collect(),
                    None => continue,
                };
                tasks.sort_by(|a, b| sess.task_order_fn(a, b));

                for task in tasks {
                    if task.init_res_req.is_empty() {
                        continue;
                    }
                    let mut stmt = Statement::new();
                    if preempt_for_task(sess, &mut stmt, &task, &queue_id) {
                        let pipelined = sess
                            .jobs
                            .get(&job_id)
                            .map(|job| sess.job_pipelined(job))
                            .unwrap_or(false);
                        if pipelined {
                            if let Err(err) = stmt.commit(sess) {
                                warn!(job = %job_id, %err, "preemption commit failed");
                            }
                        } else {
                            stmt.discard(sess);
                        }
                    } else {
                        stmt.discard(sess);
                    }
                }
            }
        }
    }
}

/// Try to free room for `preemptor` on some node by evicting same-queue
/// victims. Returns true when the preemptor was pipelined.
fn preempt_for_task(
    sess: &mut Session,
    stmt: &mut Statement,
    preemptor: &TaskInfo,
    queue_id: &QueueId,
) -> bool {
    let node_list = sess.node_list.clone();
    let (candidates, _) = predicate_nodes(sess, preemptor, &node_list);
    let scored = prioritize_nodes(sess, preemptor, &candidates);

    for (node_name, _) in scored {
        let evictees: Vec<TaskInfo> = match sess.nodes.get(&node_name) {
            Some(node) => node
                .tasks
                .values()
                .filter(|t| t.status() == TaskStatus::Running)
                .filter(|t| !t.res_req.is_empty())
                .filter(|t| t.job != preemptor.job)
                .filter(|t| {
                    sess.jobs
                        .get(&t.job)
                        .map(|job| job.queue == *queue_id)
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
            None => continue,
        };

        let victim_ids = sess.preemptable(preemptor, &evictees);
        let mut victims: Vec<TaskInfo> = evictees
            .into_iter()
            .filter(|t| victim_ids.contains(&t.uid))
            .collect();
        sort_victims(sess, &mut victims);

        let mut evicted_any = false;
        for victim in victims {
            let fits = sess
                .nodes
                .get(&node_name)
                .map(|n| preemptor.init_res_req.less_equal(&n.future_idle()))
                .unwrap_or(false);
            if fits {
                break;
            }
            match stmt.evict(sess, &victim, "preempt") {
                Ok(()) => evicted_any = true,
                Err(err) => debug!(victim = %victim.uid, %err, "eviction failed"),
            }
        }

        let fits = sess
            .nodes
            .get(&node_name)
            .map(|n| preemptor.init_res_req.less_equal(&n.future_idle()))
            .unwrap_or(false);
        if fits && (evicted_any || !stmt.is_empty()) {
            match stmt.pipeline(sess, preemptor, &node_name) {
                Ok(()) => return true,
                Err(err) => {
                    debug!(task = %preemptor.uid, node = %node_name, %err, "pipeline after preemption failed");
                    return false;
                }
            }
        }
    }
    false
}

/// Victim preference: lowest priority first, then latest creation, then
/// preemptable-marked before unmarked, then UID.
pub(crate) fn sort_victims(sess: &Session, victims: &mut [TaskInfo]) {
    victims.sort_by(|a, b| {
        let by_job_priority = {
            let pa = sess.jobs.get(&a.job).map(|j| j.priority).unwrap_or(0);
            let pb = sess.jobs.get(&b.job).map(|j| j.priority).unwrap_or(0);
            pa.cmp(&pb)
        };
        by_job_priority
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| {
                b.pod
                    .metadata
                    .creation_timestamp
                    .cmp(&a.pod.metadata.creation_timestamp)
            })
            .then_with(|| b.preemptable.cmp(&a.preemptable))
            .then_with(|| a.uid.cmp(&b.uid))
    });
}
