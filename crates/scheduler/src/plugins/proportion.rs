//! Proportion plugin: weighted fair shares per queue.
//!
//! Each queue deserves a weight-proportional slice of the cluster, capped
//! by its capability and by what its jobs actually request. Queue order,
//! overuse, reclaim victims, and enqueue admission all derive from the
//! deserved share.

use crate::conf::Arguments;
use crate::framework::{EventHandler, Plugin, Session, Verdict, PERMIT, REJECT};
use gangway_core::{JobId, QueueId, Resource};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const PLUGIN_NAME: &str = "proportion";

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(ProportionPlugin)
}

#[derive(Debug, Clone, Default)]
struct QueueAttr {
    weight: i32,
    deserved: Resource,
    allocated: Resource,
    request: Resource,
    /// Cumulative minimum resources of inqueue jobs.
    inqueue: Resource,
    share: f64,
}

impl QueueAttr {
    fn update_share(&mut self) {
        self.share = share_of(&self.allocated, &self.deserved);
    }
}

/// Dominant ratio of allocated over deserved. A dimension that is consumed
/// without being deserved counts as fully overused.
fn share_of(allocated: &Resource, deserved: &Resource) -> f64 {
    let mut share: f64 = 0.0;
    for name in allocated.resource_names() {
        let used = allocated.get(&name);
        if used <= 0.0 {
            continue;
        }
        let entitled = deserved.get(&name);
        if entitled > 0.0 {
            share = share.max(used / entitled);
        } else {
            share = share.max(1.0);
        }
    }
    share
}

struct ProportionPlugin;

impl Plugin for ProportionPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        let total = sess.total_resource.clone();
        let total_weight: i32 = sess.queues.values().map(|q| q.weight.max(1)).sum();

        let mut attrs: HashMap<QueueId, QueueAttr> = sess
            .queues
            .values()
            .map(|q| {
                (
                    q.uid.clone(),
                    QueueAttr {
                        weight: q.weight.max(1),
                        ..Default::default()
                    },
                )
            })
            .collect();

        let mut job_queues: HashMap<JobId, QueueId> = HashMap::new();
        for (id, job) in &sess.jobs {
            job_queues.insert(id.clone(), job.queue.clone());
            let Some(attr) = attrs.get_mut(&job.queue) else {
                continue;
            };
            attr.allocated.add(&job.allocated);
            attr.request.add(&job.total_request);
            if let Some(pg) = &job.pod_group {
                if pg.status.phase == gangway_apis::PodGroupPhase::Inqueue {
                    attr.inqueue.add(&job.min_resources());
                }
            }
        }

        for (queue_id, attr) in attrs.iter_mut() {
            let mut deserved = total.scaled(attr.weight as f64 / total_weight.max(1) as f64);
            if let Some(capability) = sess.queues.get(queue_id).and_then(|q| q.capability()) {
                deserved.min_dimension(&capability);
            }
            attr.deserved = deserved;
            attr.update_share();
            debug!(
                queue = %queue_id,
                deserved = %attr.deserved,
                allocated = %attr.allocated,
                share = attr.share,
                "queue share computed"
            );
        }

        let attrs = Arc::new(Mutex::new(attrs));
        let job_queues = Arc::new(job_queues);

        // Queue order: least-served share first.
        {
            let attrs = Arc::clone(&attrs);
            sess.add_queue_order_fn(
                PLUGIN_NAME,
                Box::new(move |lhs, rhs| {
                    let attrs = attrs.lock();
                    let ls = attrs.get(&lhs.uid).map(|a| a.share).unwrap_or(0.0);
                    let rs = attrs.get(&rhs.uid).map(|a| a.share).unwrap_or(0.0);
                    ls.partial_cmp(&rs).unwrap_or(Ordering::Equal)
                }),
            );
        }

        {
            let attrs = Arc::clone(&attrs);
            sess.add_overused_fn(
                PLUGIN_NAME,
                Box::new(move |queue| {
                    attrs
                        .lock()
                        .get(&queue.uid)
                        .map(|a| a.share >= 1.0)
                        .unwrap_or(false)
                }),
            );
        }

        {
            let attrs = Arc::clone(&attrs);
            sess.add_underused_resource_fn(
                PLUGIN_NAME,
                Box::new(move |queue| {
                    let attrs = attrs.lock();
                    let Some(attr) = attrs.get(&queue.uid) else {
                        return Vec::new();
                    };
                    attr.deserved
                        .resource_names()
                        .into_iter()
                        .filter(|name| attr.allocated.get(name) < attr.deserved.get(name))
                        .collect()
                }),
            );
        }

        // Reclaim victims come from queues above their deserved share, and
        // only down to that share.
        {
            let attrs = Arc::clone(&attrs);
            let job_queues = Arc::clone(&job_queues);
            sess.add_reclaimable_fn(
                PLUGIN_NAME,
                Box::new(move |_reclaimer, reclaimees| {
                    let attrs = attrs.lock();
                    let mut projected: HashMap<QueueId, Resource> = HashMap::new();
                    let mut victims = Vec::new();

                    for task in reclaimees {
                        let Some(queue_id) = job_queues.get(&task.job) else {
                            continue;
                        };
                        let Some(attr) = attrs.get(queue_id) else {
                            continue;
                        };
                        let allocation = projected
                            .entry(queue_id.clone())
                            .or_insert_with(|| attr.allocated.clone());
                        if !allocation.less_equal(&attr.deserved) {
                            victims.push(task.uid.clone());
                            let _ = allocation.sub(&task.res_req);
                        }
                    }
                    (victims, Verdict::Permit)
                }),
            );
        }

        // Admission: the job's minimum must fit in the queue's remaining
        // deserved share, counting what is already inqueue.
        {
            let attrs = Arc::clone(&attrs);
            sess.add_job_enqueueable_fn(
                PLUGIN_NAME,
                Box::new(move |job| {
                    let attrs = attrs.lock();
                    let Some(attr) = attrs.get(&job.queue) else {
                        return REJECT;
                    };
                    let mut remaining = attr.deserved.clone();
                    remaining.sub_floor(&attr.allocated);
                    remaining.sub_floor(&attr.inqueue);
                    if job.min_resources().less_equal(&remaining) {
                        PERMIT
                    } else {
                        REJECT
                    }
                }),
            );
        }

        {
            let attrs = Arc::clone(&attrs);
            sess.add_job_enqueued_fn(
                PLUGIN_NAME,
                Box::new(move |job| {
                    let mut attrs = attrs.lock();
                    if let Some(attr) = attrs.get_mut(&job.queue) {
                        attr.inqueue.add(&job.min_resources());
                    }
                }),
            );
        }

        // Track allocations live so shares stay current within the session.
        let allocate_attrs = Arc::clone(&attrs);
        let allocate_queues = Arc::clone(&job_queues);
        let deallocate_attrs = Arc::clone(&attrs);
        let deallocate_queues = Arc::clone(&job_queues);
        sess.add_event_handler(EventHandler {
            allocate_func: Some(Box::new(move |event| {
                let mut attrs = allocate_attrs.lock();
                if let Some(queue_id) = allocate_queues.get(&event.task.job) {
                    if let Some(attr) = attrs.get_mut(queue_id) {
                        attr.allocated.add(&event.task.res_req);
                        attr.update_share();
                    }
                }
            })),
            deallocate_func: Some(Box::new(move |event| {
                let mut attrs = deallocate_attrs.lock();
                if let Some(queue_id) = deallocate_queues.get(&event.task.job) {
                    if let Some(attr) = attrs.get_mut(queue_id) {
                        let _ = attr.allocated.sub(&event.task.res_req);
                        attr.update_share();
                    }
                }
            })),
        });
    }
}
