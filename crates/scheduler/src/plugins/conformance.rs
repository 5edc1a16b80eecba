//! Conformance plugin: keeps system-critical tasks out of victim sets.

use crate::conf::Arguments;
use crate::framework::{Plugin, Session, Verdict};
use gangway_apis::priority::{SYSTEM_CLUSTER_CRITICAL, SYSTEM_NAMESPACE, SYSTEM_NODE_CRITICAL};
use gangway_core::TaskInfo;

pub const PLUGIN_NAME: &str = "conformance";

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(ConformancePlugin)
}

struct ConformancePlugin;

fn evictable(_evictor: &TaskInfo, evictees: &[TaskInfo]) -> (Vec<String>, Verdict) {
    let victims = evictees
        .iter()
        .filter(|task| {
            let class = task.pod.spec.priority_class_name.as_str();
            class != SYSTEM_CLUSTER_CRITICAL
                && class != SYSTEM_NODE_CRITICAL
                && task.namespace != SYSTEM_NAMESPACE
        })
        .map(|task| task.uid.clone())
        .collect();
    (victims, Verdict::Permit)
}

impl Plugin for ConformancePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        sess.add_preemptable_fn(PLUGIN_NAME, Box::new(evictable));
        sess.add_reclaimable_fn(PLUGIN_NAME, Box::new(evictable));
    }
}
