//! Statement: a journaled batch of tentative scheduling operations.
//!
//! Operations mutate the session immediately and append an undo record.
//! `commit` performs the external effects through the cache; `discard`
//! replays the journal in reverse, restoring task contexts, node
//! accounting, and job aggregates exactly as they were.

use super::session::Session;
use crate::error::SchedulerError;
use gangway_core::{TaskInfo, TaskStatus, TransactionContext};
use tracing::debug;

#[derive(Debug, Clone)]
enum OperationKind {
    Allocate,
    Pipeline,
    Evict { reason: String },
    /// Eviction whose resources are handed to a successor immediately:
    /// the victim leaves the node's books so a reclaiming task can
    /// allocate and bind in the same cycle.
    Reclaim { reason: String },
}

#[derive(Debug, Clone)]
struct Operation {
    kind: OperationKind,
    /// Task as it looked right after the operation applied.
    task: TaskInfo,
    /// Transaction context right before the operation.
    prev: TransactionContext,
}

/// Transactional scratchpad of one action over one session. Never crosses
/// session boundaries.
#[derive(Default)]
pub struct Statement {
    operations: Vec<Operation>,
}

impl Statement {
    pub(crate) fn new() -> Self {
        Statement::default()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn apply_status(
        sess: &mut Session,
        task: &TaskInfo,
        node_name: &str,
        status: TaskStatus,
    ) -> Result<(TaskInfo, TransactionContext), SchedulerError> {
        let job = sess
            .jobs
            .get_mut(&task.job)
            .ok_or_else(|| SchedulerError::JobNotFound(task.job.clone()))?;

        let prev = job.tasks.get(&task.uid).map(|t| t.tx.clone()).ok_or_else(|| {
            SchedulerError::Domain(gangway_core::DomainError::TaskNotFound {
                task: task.uid.clone(),
                job: task.job.clone(),
            })
        })?;

        if let Some(t) = job.tasks.get_mut(&task.uid) {
            t.generate_last_tx_context();
            t.tx.node_name = node_name.to_string();
        }
        if let Err(err) = job.update_task_status(&task.uid, status) {
            // Restore the node assignment we just wrote.
            if let Some(t) = job.tasks.get_mut(&task.uid) {
                t.tx.node_name = prev.node_name.clone();
            }
            return Err(err.into());
        }

        Ok((job.tasks[&task.uid].clone(), prev))
    }

    /// Tentatively allocate `task` onto `node_name`.
    pub fn allocate(
        &mut self,
        sess: &mut Session,
        task: &TaskInfo,
        node_name: &str,
    ) -> Result<(), SchedulerError> {
        sess.cache
            .volume_binder
            .get_pod_volumes(task)
            .and_then(|volumes| {
                sess.cache
                    .volume_binder
                    .allocate_volumes(task, node_name, &volumes)
            })?;

        let (updated, prev) = Self::apply_status(sess, task, node_name, TaskStatus::Allocated)?;

        let node = match sess.nodes.get_mut(node_name) {
            Some(node) => node,
            None => {
                Self::rollback_status(sess, &updated, &prev);
                return Err(SchedulerError::NodeNotFound(node_name.to_string()));
            }
        };
        if let Err(err) = node.add_task(&updated) {
            Self::rollback_status(sess, &updated, &prev);
            return Err(err.into());
        }
        debug!(
            task = %updated.uid,
            node = node_name,
            "allocated task in session"
        );

        sess.fire_allocate_event(&updated);
        self.operations.push(Operation {
            kind: OperationKind::Allocate,
            task: updated,
            prev,
        });
        Ok(())
    }

    /// Tentatively pipeline `task` onto `node_name`, claiming resources
    /// that are still being released.
    pub fn pipeline(
        &mut self,
        sess: &mut Session,
        task: &TaskInfo,
        node_name: &str,
    ) -> Result<(), SchedulerError> {
        let (updated, prev) = Self::apply_status(sess, task, node_name, TaskStatus::Pipelined)?;

        let node = match sess.nodes.get_mut(node_name) {
            Some(node) => node,
            None => {
                Self::rollback_status(sess, &updated, &prev);
                return Err(SchedulerError::NodeNotFound(node_name.to_string()));
            }
        };
        if let Err(err) = node.add_task(&updated) {
            Self::rollback_status(sess, &updated, &prev);
            return Err(err.into());
        }

        sess.fire_allocate_event(&updated);
        self.operations.push(Operation {
            kind: OperationKind::Pipeline,
            task: updated,
            prev,
        });
        Ok(())
    }

    /// Tentatively evict `reclaimee`.
    pub fn evict(
        &mut self,
        sess: &mut Session,
        reclaimee: &TaskInfo,
        reason: &str,
    ) -> Result<(), SchedulerError> {
        let node_name = reclaimee.node_name().to_string();
        let (updated, prev) =
            Self::apply_status(sess, reclaimee, &node_name, TaskStatus::Releasing)?;

        if let Some(node) = sess.nodes.get_mut(&node_name) {
            if let Err(err) = node.update_task(&updated) {
                Self::rollback_status(sess, &updated, &prev);
                return Err(err.into());
            }
        }

        sess.fire_deallocate_event(&updated);
        self.operations.push(Operation {
            kind: OperationKind::Evict {
                reason: reason.to_string(),
            },
            task: updated,
            prev,
        });
        Ok(())
    }

    /// Tentatively evict `reclaimee` and free its resources on the node
    /// at once, so a reclaiming task can allocate against them before the
    /// victim is actually gone.
    pub fn reclaim(
        &mut self,
        sess: &mut Session,
        reclaimee: &TaskInfo,
        reason: &str,
    ) -> Result<(), SchedulerError> {
        let node_name = reclaimee.node_name().to_string();
        let (updated, prev) =
            Self::apply_status(sess, reclaimee, &node_name, TaskStatus::Releasing)?;

        let node = match sess.nodes.get_mut(&node_name) {
            Some(node) => node,
            None => {
                Self::rollback_status(sess, &updated, &prev);
                return Err(SchedulerError::NodeNotFound(node_name));
            }
        };
        if let Err(err) = node.update_task(&updated) {
            Self::rollback_status(sess, &updated, &prev);
            return Err(err.into());
        }
        // Dropping the task from the node turns its releasing share into
        // idle resources right away.
        if let Err(err) = node.remove_task(&updated.uid) {
            Self::unevict(sess, &updated, &prev);
            return Err(err.into());
        }

        sess.fire_deallocate_event(&updated);
        self.operations.push(Operation {
            kind: OperationKind::Reclaim {
                reason: reason.to_string(),
            },
            task: updated,
            prev,
        });
        Ok(())
    }

    fn rollback_status(sess: &mut Session, task: &TaskInfo, prev: &TransactionContext) {
        if let Some(job) = sess.jobs.get_mut(&task.job) {
            let _ = job.restore_task_context(&task.uid, prev.clone());
            if let Some(t) = job.tasks.get_mut(&task.uid) {
                t.clear_last_tx_context();
            }
        }
    }

    /// Replay the journal against the cache: dispatch allocations to
    /// binding, fire evictions. The journal is consumed.
    pub fn commit(mut self, sess: &mut Session) -> Result<(), SchedulerError> {
        let operations = std::mem::take(&mut self.operations);
        for op in operations {
            match &op.kind {
                OperationKind::Allocate => sess.dispatch(&op.task)?,
                OperationKind::Pipeline => {
                    // A pipelined placement is a session-local promise;
                    // nothing reaches the cluster until resources free up.
                }
                OperationKind::Evict { reason } => {
                    sess.cache.evict(&op.task, reason)?;
                }
                OperationKind::Reclaim { reason } => {
                    sess.cache.evict_and_release(&op.task, reason)?;
                }
            }
        }
        Ok(())
    }

    /// Undo every operation in reverse order, restoring the session to the
    /// state before this statement.
    pub fn discard(mut self, sess: &mut Session) {
        debug!(ops = self.operations.len(), "discarding operations");
        let operations = std::mem::take(&mut self.operations);
        for op in operations.into_iter().rev() {
            match op.kind {
                OperationKind::Allocate | OperationKind::Pipeline => {
                    Self::unassign(sess, &op.task, &op.prev);
                    sess.fire_deallocate_event(&op.task);
                }
                OperationKind::Evict { .. } => {
                    Self::unevict(sess, &op.task, &op.prev);
                    sess.fire_allocate_event(&op.task);
                }
                OperationKind::Reclaim { .. } => {
                    // Re-attach the releasing victim first; unevict then
                    // walks it back to its previous state.
                    if let Some(node) = sess.nodes.get_mut(op.task.node_name()) {
                        let _ = node.add_task(&op.task);
                    }
                    Self::unevict(sess, &op.task, &op.prev);
                    sess.fire_allocate_event(&op.task);
                }
            }
        }
    }

    /// Keep the session mutations but drop the journal without external
    /// effects: used for pipelined placements that wait for resources.
    pub fn forget(mut self) {
        self.operations.clear();
    }

    fn unassign(sess: &mut Session, task: &TaskInfo, prev: &TransactionContext) {
        if let Some(node) = sess.nodes.get_mut(task.node_name()) {
            let _ = node.remove_task(&task.uid);
        }
        Self::rollback_status(sess, task, prev);
    }

    fn unevict(sess: &mut Session, task: &TaskInfo, prev: &TransactionContext) {
        Self::rollback_status(sess, task, prev);
        let restored = sess
            .jobs
            .get(&task.job)
            .and_then(|job| job.tasks.get(&task.uid))
            .cloned();
        if let (Some(node), Some(restored)) = (sess.nodes.get_mut(task.node_name()), restored) {
            let _ = node.update_task(&restored);
        }
    }
}
