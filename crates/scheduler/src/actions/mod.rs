//! Scheduling actions: the ordered phases of one tick.

pub mod allocate;
pub mod backfill;
pub mod enqueue;
pub mod preempt;
pub mod reclaim;
mod util;

use crate::error::SchedulerError;
use crate::framework::Action;

/// Resolve a configured action name.
pub fn new_action(name: &str) -> Result<Box<dyn Action>, SchedulerError> {
    match name {
        enqueue::ENQUEUE => Ok(Box::new(enqueue::Enqueue)),
        allocate::ALLOCATE => Ok(Box::new(allocate::Allocate)),
        preempt::PREEMPT => Ok(Box::new(preempt::Preempt)),
        reclaim::RECLAIM => Ok(Box::new(reclaim::Reclaim)),
        backfill::BACKFILL => Ok(Box::new(backfill::Backfill)),
        other => Err(SchedulerError::UnknownAction(other.to_string())),
    }
}
