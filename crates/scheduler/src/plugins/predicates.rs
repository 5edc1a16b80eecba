//! Predicates plugin: hard node feasibility gates.

use crate::conf::Arguments;
use crate::error::SchedulerError;
use crate::framework::{Plugin, Session};
use gangway_core::NodePhase;

pub const PLUGIN_NAME: &str = "predicates";

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(PredicatesPlugin)
}

struct PredicatesPlugin;

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        sess.add_predicate_fn(
            PLUGIN_NAME,
            Box::new(|task, node| {
                if node.state.phase != NodePhase::Ready {
                    return Err(SchedulerError::Predicate {
                        task: format!("{}/{}", task.namespace, task.name),
                        node: node.name.clone(),
                        reason: format!("node is not ready ({})", node.state.reason),
                    });
                }
                Ok(())
            }),
        );
    }
}
