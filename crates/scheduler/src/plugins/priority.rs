//! Priority plugin: order jobs and tasks by priority, and let higher
//! priority jobs preempt lower ones.

use crate::conf::Arguments;
use crate::framework::{Plugin, Session, Verdict};
use gangway_core::JobId;
use std::collections::HashMap;

pub const PLUGIN_NAME: &str = "priority";

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(PriorityPlugin)
}

struct PriorityPlugin;

impl Plugin for PriorityPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        sess.add_task_order_fn(
            PLUGIN_NAME,
            Box::new(|lhs, rhs| rhs.priority.cmp(&lhs.priority)),
        );

        sess.add_job_order_fn(
            PLUGIN_NAME,
            Box::new(|lhs, rhs| rhs.priority.cmp(&lhs.priority)),
        );

        // Victims must belong to strictly lower-priority jobs.
        let job_priorities: HashMap<JobId, i32> = sess
            .jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.priority))
            .collect();
        sess.add_preemptable_fn(
            PLUGIN_NAME,
            Box::new(move |preemptor, preemptees| {
                let Some(preemptor_priority) = job_priorities.get(&preemptor.job) else {
                    return (Vec::new(), Verdict::Abstain);
                };
                let victims = preemptees
                    .iter()
                    .filter(|t| {
                        job_priorities
                            .get(&t.job)
                            .map(|p| p < preemptor_priority)
                            .unwrap_or(false)
                    })
                    .map(|t| t.uid.clone())
                    .collect();
                (victims, Verdict::Permit)
            }),
        );
    }
}
