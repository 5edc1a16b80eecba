//! Backfill: squeeze best-effort tasks onto any node that passes the
//! predicates. Tasks with empty initial requests are trivially
//! satisfiable, so each fit allocates and dispatches at once.

use crate::framework::{Action, Session};
use gangway_core::{FitError, FitErrors, TaskInfo, TaskStatus};
use tracing::{debug, warn};

pub const BACKFILL: &str = "backfill";

pub struct Backfill;

impl Action for Backfill {
    fn name(&self) -> &str {
        BACKFILL
    }

    fn execute(&self, sess: &mut Session) {
        debug!("enter backfill");

        let job_ids: Vec<String> = sess.jobs.keys().cloned().collect();
        for job_id in job_ids {
            let skip = match sess.jobs.get(&job_id) {
                Some(job) => job.is_pending() || sess.job_valid(job).is_some(),
                None => true,
            };
            if skip {
                continue;
            }

            let tasks: Vec<TaskInfo> = match sess.jobs.get(&job_id) {
                Some(job) => job
                    .tasks_in(TaskStatus::Pending)
                    .into_iter()
                    .filter(|t| t.init_res_req.is_empty())
                    .cloned()
                    .collect(),
                None => continue,
            };

            for task in tasks {
                let mut fit_errors = FitErrors::new();
                let node_list = sess.node_list.clone();
                let mut placed = false;

                for node_name in node_list {
                    let verdict = match sess.nodes.get(&node_name) {
                        Some(node) => sess.predicate_fn(&task, node),
                        None => continue,
                    };
                    match verdict {
                        Ok(()) => {
                            if let Err(err) = sess.allocate(&task, &node_name) {
                                warn!(task = %task.uid, node = %node_name, %err, "backfill allocation failed");
                                continue;
                            }
                            placed = true;
                            break;
                        }
                        Err(err) => {
                            fit_errors.set_node_error(
                                &node_name,
                                FitError::new(&task, &node_name, vec![err.to_string()]),
                            );
                        }
                    }
                }

                if !placed {
                    if let Some(job) = sess.jobs.get_mut(&job_id) {
                        job.nodes_fit_errors.insert(task.uid.clone(), fit_errors);
                    }
                }
            }
        }
    }
}
