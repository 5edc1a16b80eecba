//! Enqueue: admit pending jobs into their queues.
//!
//! Queues drain round-robin by queue order; within a queue the
//! highest-order pending job is considered. A job enters the Inqueue phase
//! when it declares no minimum resources or the enqueueable vote permits.

use super::util::pick_best;
use crate::framework::{Action, Session};
use gangway_apis::PodGroupPhase;
use gangway_core::{JobId, QueueId};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, error};

pub const ENQUEUE: &str = "enqueue";

pub struct Enqueue;

impl Action for Enqueue {
    fn name(&self) -> &str {
        ENQUEUE
    }

    fn execute(&self, sess: &mut Session) {
        debug!("enter enqueue");

        // Stamp the moment each job first became eligible for scheduling.
        let now = chrono::Utc::now();
        for job in sess.jobs.values_mut() {
            if job.schedule_start_timestamp.is_none() {
                job.schedule_start_timestamp = Some(now);
            }
        }

        let mut jobs_map: HashMap<QueueId, Vec<JobId>> = HashMap::new();
        for (id, job) in &sess.jobs {
            if !sess.queues.contains_key(&job.queue) {
                error!(queue = %job.queue, job = %id, "queue not found for job");
                continue;
            }
            if job.is_pending() {
                debug!(job = %id, queue = %job.queue, "job waits for enqueue");
                jobs_map.entry(job.queue.clone()).or_default().push(id.clone());
            }
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

            let Some(bucket) = jobs_map.get_mut(&queue_id) else {
                active.remove(qi);
                continue;
            };
            let Some(ji) = pick_best(bucket, |a, b| {
                match (sess.jobs.get(a), sess.jobs.get(b)) {
                    (Some(ja), Some(jb)) => sess.job_order_fn(ja, jb) == Ordering::Less,
                    _ => false,
                }
            }) else {
                active.remove(qi);
                continue;
            };
            let job_id = bucket.remove(ji);

            let admit = match sess.jobs.get(&job_id) {
                Some(job) => {
                    let no_min_resources = job
                        .pod_group
                        .as_ref()
                        .map(|pg| pg.spec.min_resources.is_none())
                        .unwrap_or(true);
                    no_min_resources || sess.job_enqueueable(job)
                }
                None => false,
            };

            if admit {
                if let Some(job) = sess.jobs.get(&job_id) {
                    sess.job_enqueued(job);
                }
                if let Some(job) = sess.jobs.get_mut(&job_id) {
                    if let Some(pg) = &mut job.pod_group {
                        pg.status.phase = PodGroupPhase::Inqueue;
                    }
                    debug!(job = %job_id, "job enqueued");
                }
            }
            // The queue stays in the rotation only while it has jobs left.
        }
    }
}
