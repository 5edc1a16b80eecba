//! Allocate: place the tasks of inqueue jobs onto feasible nodes.
//!
//! Queues are served in queue order, jobs in job order, tasks in task
//! order. Every job's placements collect in one statement: committed when
//! the gang is ready, kept as pipelined when the pipelined vote permits,
//! discarded otherwise.

use super::util::{pick_best, predicate_nodes, prioritize_nodes};
use crate::framework::{Action, Session, Statement};
use gangway_core::{JobId, QueueId, TaskInfo, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const ALLOCATE: &str = "allocate";

pub struct Allocate;

impl Action for Allocate {
    fn name(&self) -> &str {
        ALLOCATE
    }

    fn execute(&self, sess: &mut Session) {
        debug!("enter allocate");

        let mut jobs_map: HashMap<QueueId, Vec<JobId>> = HashMap::new();
        for (id, job) in &sess.jobs {
            if job.is_pending() {
                continue;
            }
            if sess.job_valid(job).is_some() {
                continue;
            }
            if !sess.queues.contains_key(&job.queue) {
                warn!(queue = %job.queue, job = %id, "queue not found for job");
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

            // An overused queue gets nothing more this tick.
            let overused = sess
                .queues
                .get(&queue_id)
                .map(|q| sess.overused(q))
                .unwrap_or(true);
            if overused {
                debug!(queue = %queue_id, "queue overused, skipping");
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

            allocate_job(sess, &job_id);
        }
    }
}

fn allocate_job(sess: &mut Session, job_id: &JobId) {
    let mut tasks: Vec<TaskInfo> = match sess.jobs.get(job_id) {
        Some(job) => job
            .tasks_in(TaskStatus::Pending)
            .into_iter()
            .cloned()
            .collect(),
        None => return,
    };
    if tasks.is_empty() {
        return;
    }
    tasks.sort_by(|a, b| sess.task_order_fn(a, b));

    let node_list = sess.node_list.clone();
    let mut stmt = Statement::new();

    for task in tasks {
        let (candidates, fit_errors) = predicate_nodes(sess, &task, &node_list);
        if candidates.is_empty() {
            if let Some(job) = sess.jobs.get_mut(job_id) {
                job.nodes_fit_errors.insert(task.uid.clone(), fit_errors);
            }
            // One unplaceable member stalls the gang.
            break;
        }

        let scored = prioritize_nodes(sess, &task, &candidates);

        let mut placed = false;
        for (node_name, _) in &scored {
            let fits_idle = sess
                .nodes
                .get(node_name)
                .map(|n| task.init_res_req.less_equal(&n.idle))
                .unwrap_or(false);
            if !fits_idle {
                continue;
            }
            match stmt.allocate(sess, &task, node_name) {
                Ok(()) => {
                    placed = true;
                    break;
                }
                Err(err) => debug!(task = %task.uid, node = %node_name, %err, "allocation attempt failed"),
            }
        }

        if !placed {
            // Fall back to resources that are still being released.
            for (node_name, _) in &scored {
                let fits_future = sess
                    .nodes
                    .get(node_name)
                    .map(|n| task.init_res_req.less_equal(&n.future_idle()))
                    .unwrap_or(false);
                if !fits_future {
                    continue;
                }
                match stmt.pipeline(sess, &task, node_name) {
                    Ok(()) => {
                        placed = true;
                        break;
                    }
                    Err(err) => debug!(task = %task.uid, node = %node_name, %err, "pipeline attempt failed"),
                }
            }
        }

        if !placed {
            debug!(task = %task.uid, "no node can hold the task this tick");
            let mut errors = gangway_core::FitErrors::new();
            for (node_name, _) in &scored {
                if let Some(node) = sess.nodes.get(node_name) {
                    let short = task.init_res_req.fit_delta(&node.idle);
                    errors.set_node_error(
                        node_name,
                        gangway_core::FitError::new(
                            &task,
                            node_name,
                            vec![format!("insufficient idle resources, short of {}", short)],
                        ),
                    );
                }
            }
            if let Some(job) = sess.jobs.get_mut(job_id) {
                job.nodes_fit_errors.insert(task.uid.clone(), errors);
                job.job_fit_errors = job.fit_error();
            }
        }
    }

    let (ready, pipelined) = match sess.jobs.get(job_id) {
        Some(job) => (sess.job_ready(job), sess.job_pipelined(job)),
        None => (false, false),
    };

    if ready && !stmt.is_empty() {
        if let Err(err) = stmt.commit(sess) {
            warn!(job = %job_id, %err, "commit failed");
        }
    } else if pipelined {
        // Placements stay in the session awaiting released resources.
        stmt.forget();
    } else {
        stmt.discard(sess);
    }
}
