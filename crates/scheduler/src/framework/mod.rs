//! The plugin extension framework.
//!
//! An `Action` is one phase of a scheduling tick. A `Plugin` registers
//! callbacks against the current session in `on_session_open`; the session
//! composes callbacks across the configured tiers. Plugin builders live in
//! a process-wide registry populated at startup.

pub mod session;
pub mod session_plugins;
pub mod statement;
pub mod types;

pub use session::{close_session, open_session, Session};
pub use statement::Statement;
pub use types::*;

use crate::conf::Arguments;
use crate::error::SchedulerError;
use gangway_core::TaskInfo;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One phase of a scheduling tick.
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn initialize(&self) {}
    fn execute(&self, sess: &mut Session);
    fn un_initialize(&self) {}
}

/// A named scheduling algorithm hooked into sessions.
pub trait Plugin: Send {
    fn name(&self) -> &str;
    fn on_session_open(&mut self, sess: &mut Session);
    fn on_session_close(&mut self, _sess: &mut Session) {}
}

/// Builds a plugin instance from its configured arguments.
pub type PluginBuilder = Arc<dyn Fn(Arguments) -> Box<dyn Plugin> + Send + Sync>;

static PLUGIN_BUILDERS: Lazy<RwLock<HashMap<String, PluginBuilder>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a plugin builder under a unique name.
pub fn register_plugin_builder(
    name: &str,
    builder: impl Fn(Arguments) -> Box<dyn Plugin> + Send + Sync + 'static,
) -> Result<(), SchedulerError> {
    let mut builders = PLUGIN_BUILDERS.write();
    if builders.contains_key(name) {
        return Err(SchedulerError::DuplicatePlugin(name.to_string()));
    }
    builders.insert(name.to_string(), Arc::new(builder));
    Ok(())
}

pub fn get_plugin_builder(name: &str) -> Option<PluginBuilder> {
    PLUGIN_BUILDERS.read().get(name).cloned()
}

/// Drop every registered builder. For tests.
pub fn cleanup_plugin_builders() {
    PLUGIN_BUILDERS.write().clear();
}

/// Register the built-in plugin set, ignoring duplicates from repeated
/// initialization.
pub fn register_default_plugins() {
    for (name, builder) in crate::plugins::builtin_plugins() {
        if let Err(err) = register_plugin_builder(name, builder) {
            tracing::debug!(%err, "plugin already registered");
        }
    }
}

/// Notification payload for allocate/deallocate hooks.
pub struct Event {
    pub task: TaskInfo,
}

type EventFn = Box<dyn Fn(&Event) + Send>;

/// Hooks a plugin can attach to observe session mutations.
#[derive(Default)]
pub struct EventHandler {
    pub allocate_func: Option<EventFn>,
    pub deallocate_func: Option<EventFn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPlugin;
    impl Plugin for NullPlugin {
        fn name(&self) -> &str {
            "null"
        }
        fn on_session_open(&mut self, _sess: &mut Session) {}
    }

    #[test]
    fn duplicate_builders_are_rejected() {
        // A unique name keeps this test independent of the shared registry.
        register_plugin_builder("null-duplicate-check", |_| Box::new(NullPlugin)).unwrap();
        assert!(register_plugin_builder("null-duplicate-check", |_| Box::new(NullPlugin)).is_err());
    }
}
