//! Gang plugin: minimum-member semantics.
//!
//! Validates that a job can ever reach its minimum, votes on readiness and
//! pipelining, keeps eviction from breaking running gangs, and surfaces
//! unschedulable gangs on session close.

use crate::conf::Arguments;
use crate::framework::{Plugin, Session, ValidateResult, Verdict, PERMIT, REJECT};
use crate::metrics;
use gangway_apis::{ConditionStatus, EventType, PodGroupCondition, PodGroupConditionType};
use gangway_core::JobId;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

pub const PLUGIN_NAME: &str = "gang";

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(GangPlugin)
}

struct GangPlugin;

impl Plugin for GangPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        sess.add_job_valid_fn(
            PLUGIN_NAME,
            Box::new(|job| {
                if !job.check_task_min_available() {
                    return Some(ValidateResult {
                        pass: false,
                        reason: "NotEnoughTaskMinAvailable".to_string(),
                        message: format!(
                            "job {}/{} cannot satisfy its per-task minimums",
                            job.namespace, job.name
                        ),
                    });
                }
                let valid = job.valid_task_num();
                if valid < job.min_available {
                    return Some(ValidateResult {
                        pass: false,
                        reason: "NotEnoughPods".to_string(),
                        message: format!(
                            "job has {} valid tasks, requires {} at minimum",
                            valid, job.min_available
                        ),
                    });
                }
                None
            }),
        );

        // Evicting below the minimum breaks the gang; only members above
        // the job's minimum are fair game.
        let occupancy: HashMap<JobId, (i32, i32)> = sess
            .jobs
            .iter()
            .map(|(id, job)| (id.clone(), (job.ready_task_num(), job.min_available)))
            .collect();
        let evictable = move |_evictor: &gangway_core::TaskInfo,
                              evictees: &[gangway_core::TaskInfo]| {
            let mut remaining: HashMap<JobId, i32> = HashMap::new();
            let mut victims = Vec::new();
            for task in evictees {
                let Some((ready, min_available)) = occupancy.get(&task.job) else {
                    continue;
                };
                let left = remaining.entry(task.job.clone()).or_insert(*ready);
                if *left > *min_available {
                    victims.push(task.uid.clone());
                    *left -= 1;
                }
            }
            (victims, Verdict::Permit)
        };
        sess.add_preemptable_fn(PLUGIN_NAME, Box::new(evictable.clone()));
        sess.add_reclaimable_fn(PLUGIN_NAME, Box::new(evictable));

        // Not-yet-ready gangs schedule before ready ones.
        let readiness: HashMap<JobId, bool> = sess
            .jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.ready()))
            .collect();
        sess.add_job_order_fn(
            PLUGIN_NAME,
            Box::new(move |lhs, rhs| {
                let lhs_ready = readiness.get(&lhs.uid).copied().unwrap_or(false);
                let rhs_ready = readiness.get(&rhs.uid).copied().unwrap_or(false);
                match (lhs_ready, rhs_ready) {
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => Ordering::Equal,
                }
            }),
        );

        sess.add_job_ready_fn(
            PLUGIN_NAME,
            Box::new(|job| job.ready() && job.check_task_min_available_ready()),
        );

        sess.add_job_pipelined_fn(
            PLUGIN_NAME,
            Box::new(|job| {
                let occupied = job.waiting_task_num() + job.ready_task_num();
                if occupied >= job.min_available && job.check_task_min_available_pipelined() {
                    PERMIT
                } else {
                    REJECT
                }
            }),
        );

        sess.add_job_starving_fn(
            PLUGIN_NAME,
            Box::new(|job| job.waiting_task_num() + job.ready_task_num() < job.min_available),
        );
    }

    fn on_session_close(&mut self, sess: &mut Session) {
        let unready: Vec<(JobId, String)> = sess
            .jobs
            .values()
            .filter(|job| !job.ready() && job.pod_group.is_some())
            .map(|job| (job.uid.clone(), job.fit_error()))
            .collect();

        for (job_id, message) in unready {
            metrics::register_job_retries(&job_id);
            sess.cache.recorder.event(
                &job_id,
                EventType::Warning,
                "PodGroupNotReady",
                &message,
            );
            let condition = PodGroupCondition {
                condition_type: PodGroupConditionType::Unschedulable,
                status: ConditionStatus::True,
                transition_id: sess.uid.clone(),
                last_transition_time: chrono::Utc::now(),
                reason: "NotEnoughResources".to_string(),
                message,
            };
            if let Err(err) = sess.update_pod_group_condition(&job_id, condition) {
                warn!(job = %job_id, %err, "failed to mark gang unschedulable");
            }
        }
    }
}
