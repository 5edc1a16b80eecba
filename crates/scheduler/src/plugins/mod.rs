//! Built-in scheduling plugins.

pub mod conformance;
pub mod gang;
pub mod nodeorder;
pub mod predicates;
pub mod priority;
pub mod proportion;

use crate::conf::Arguments;
use crate::framework::Plugin;

type BuilderFn = fn(Arguments) -> Box<dyn Plugin>;

/// The built-in plugin set, as (name, builder) pairs.
pub fn builtin_plugins() -> Vec<(&'static str, BuilderFn)> {
    vec![
        (priority::PLUGIN_NAME, priority::new),
        (gang::PLUGIN_NAME, gang::new),
        (conformance::PLUGIN_NAME, conformance::new),
        (proportion::PLUGIN_NAME, proportion::new),
        (predicates::PLUGIN_NAME, predicates::new),
        (nodeorder::PLUGIN_NAME, nodeorder::new),
    ]
}
