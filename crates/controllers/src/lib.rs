//! Lifecycle controllers for the gangway orchestrator.
//!
//! The job controller reconciles batch jobs through their state machine,
//! creating and killing pods; the queue controller keeps queue status
//! aggregates fresh and applies open/close commands. Both consume the
//! declarative store through the `ControlClient` seam and reconcile off
//! rate-limited work queues.

pub mod apis;
pub mod cache;
pub mod client;
pub mod error;
pub mod framework;
pub mod job;
pub mod queue;
pub mod workqueue;

pub use error::ControllerError;

use crate::framework::Controller;
use std::sync::Arc;

/// Register the built-in controllers, ignoring repeated initialization.
pub fn register_default_controllers() {
    let _ = framework::register_controller(job::CONTROLLER_NAME, |opt| {
        Arc::new(job::JobController::new(opt)) as Arc<dyn Controller>
    });
    let _ = framework::register_controller(queue::CONTROLLER_NAME, |opt| {
        Arc::new(queue::QueueController::new(opt)) as Arc<dyn Controller>
    });
}
