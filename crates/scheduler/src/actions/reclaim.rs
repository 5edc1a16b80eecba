//! Reclaim: take resources back across queues for under-served queues.
//!
//! Candidate victims are running, preemptable tasks of other queues that
//! allow reclaiming. The reclaimable composition decides the final victim
//! set; reclaim evictions free the node's books at once, so the minimum
//! set is evicted until the reclaiming task fits, which then allocates
//! and dispatches to binding in the same cycle. Evictions and placement
//! commit atomically; any failure discards both.

use super::preempt::sort_victims;
use super::util::{pick_best, predicate_nodes, prioritize_nodes};
use crate::framework::{Action, Session, Statement};
use gangway_core::{JobId, QueueId, TaskInfo, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const RECLAIM: &str = "reclaim";

pub struct Reclaim;

impl Action for Reclaim {
    fn name(&self) -> &str {
        RECLAIM
    }

    fn execute(&self, sess: &mut Session) {
        debug!("enter reclaim");

        let mut jobs_map: HashMap<QueueId, Vec<JobId>> = HashMap::new();
        for (id, job) in &sess.jobs {
            if job.is_pending() || sess.job_valid(job).is_some() {
                continue;
            }
            let Some(queue) = sess.queues.get(&job.queue) else {
                continue;
            };
            if queue.queue.status.state != gangway_apis::QueueState::Open {
                continue;
            }
            jobs_map.entry(job.queue.clone()).or_default().push(id.clone());
        }

        let mut active: Vec<QueueId> = jobs_map.keys().cloned().collect();
        loop {
            active.retain(|q| jobs_map.get(q).map(|jobs| !jobs.is_empty()).unwrap_or(false));
            let Some(qi) = pick_best(&active, |a, b| {
                match (sess.queues.get(a), sess.queues.get(b)) {
                    (Some(qa), Some(qb)) => sess.queue_order_fn(qa, qb) == Ordering::Less,
                    _ => false,
                }
            }) else {
                break;
            };
            let queue_id = active[qi].clone();

            // A queue already at or above its share reclaims nothing.
            let overused = sess
                .queues
                .get(&queue_id)
                .map(|q| sess.overused(q))
                .unwrap_or(true);
            if overused {
                jobs_map.remove(&queue_id);
                continue;
            }

            let Some(bucket) = jobs_map.get_mut(&queue_id) else {
                continue;
            };
            let Some(ji) = pick_best(bucket, |a, b| {
                match (sess.jobs.get(a), sess.jobs.get(b)) {
                    (Some(ja), Some(jb)) => sess.job_order_fn(ja, jb) == Ordering::Less,
                    _ => false,
                }
            }) else {
                continue;
            };
            let job_id = bucket.remove(ji);

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
                reclaim_for_task(sess, &task, &queue_id);
            }
        }
    }
}

fn reclaim_for_task(sess: &mut Session, reclaimer: &TaskInfo, queue_id: &QueueId) -> bool {
    let node_list = sess.node_list.clone();
    let (candidates, _) = predicate_nodes(sess, reclaimer, &node_list);
    let scored = prioritize_nodes(sess, reclaimer, &candidates);

    for (node_name, _) in scored {
        let reclaimees: Vec<TaskInfo> = match sess.nodes.get(&node_name) {
            Some(node) => node
                .tasks
                .values()
                .filter(|t| t.status() == TaskStatus::Running)
                .filter(|t| t.preemptable)
                .filter(|t| {
                    sess.jobs
                        .get(&t.job)
                        .map(|job| {
                            job.queue != *queue_id
                                && sess
                                    .queues
                                    .get(&job.queue)
                                    .map(|q| q.reclaimable())
                                    .unwrap_or(false)
                        })
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
            None => continue,
        };
        if reclaimees.is_empty() {
            continue;
        }

        let victim_ids = sess.reclaimable(reclaimer, &reclaimees);
        let mut victims: Vec<TaskInfo> = reclaimees
            .into_iter()
            .filter(|t| victim_ids.contains(&t.uid))
            .collect();
        if victims.is_empty() {
            continue;
        }
        sort_victims(sess, &mut victims);

        let fits_node = |sess: &Session| {
            sess.nodes
                .get(&node_name)
                .map(|n| reclaimer.init_res_req.less_equal(&n.idle))
                .unwrap_or(false)
        };

        // Evict the minimum set whose freed resources let the task fit.
        let mut stmt = Statement::new();
        for victim in victims {
            if fits_node(sess) {
                break;
            }
            if let Err(err) = stmt.reclaim(sess, &victim, "reclaim") {
                debug!(victim = %victim.uid, %err, "reclaim eviction failed");
            }
        }

        if !fits_node(sess) {
            stmt.discard(sess);
            continue;
        }

        if let Err(err) = stmt.allocate(sess, reclaimer, &node_name) {
            debug!(task = %reclaimer.uid, node = %node_name, %err, "allocation after reclaim failed");
            stmt.discard(sess);
            continue;
        }

        let ready = sess
            .jobs
            .get(&reclaimer.job)
            .map(|job| sess.job_ready(job))
            .unwrap_or(false);
        if !ready {
            // Binding a partial gang would strand the evictions.
            stmt.discard(sess);
            continue;
        }

        if let Err(err) = stmt.commit(sess) {
            warn!(task = %reclaimer.uid, %err, "reclaim commit failed");
        }
        return true;
    }
    false
}
