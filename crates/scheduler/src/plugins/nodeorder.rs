//! Nodeorder plugin: least-requested scoring. Emptier nodes score higher,
//! spreading load across the cluster.

use crate::conf::Arguments;
use crate::framework::{Plugin, Session};

pub const PLUGIN_NAME: &str = "nodeorder";

/// Score ceiling per dimension.
const MAX_NODE_SCORE: f64 = 100.0;

pub fn new(_args: Arguments) -> Box<dyn Plugin> {
    Box::new(NodeOrderPlugin)
}

struct NodeOrderPlugin;

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, sess: &mut Session) {
        sess.add_node_order_fn(
            PLUGIN_NAME,
            Box::new(|_task, node| {
                let cpu_fraction = if node.allocatable.milli_cpu > 0.0 {
                    node.idle.milli_cpu / node.allocatable.milli_cpu
                } else {
                    0.0
                };
                let memory_fraction = if node.allocatable.memory > 0.0 {
                    node.idle.memory / node.allocatable.memory
                } else {
                    0.0
                };
                Ok((cpu_fraction + memory_fraction) / 2.0 * MAX_NODE_SCORE)
            }),
        );
    }
}
