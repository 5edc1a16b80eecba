//! Controller trait and process-wide registry.

use crate::client::ControlClient;
use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::EventRecorder;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Dependencies handed to every controller at initialization.
#[derive(Clone)]
pub struct ControllerOption {
    pub client: Arc<dyn ControlClient>,
    pub recorder: Arc<dyn EventRecorder>,
    pub scheduler_names: Vec<String>,
    pub worker_num: u32,
    /// Reconcile retries before an item is dropped; -1 means unlimited.
    pub max_requeue_num: i32,
}

#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, stop: watch::Receiver<bool>);
}

type ControllerFactory = Arc<dyn Fn(&ControllerOption) -> Arc<dyn Controller> + Send + Sync>;

static CONTROLLERS: Lazy<RwLock<HashMap<String, ControllerFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a controller factory under a unique name.
pub fn register_controller(
    name: &str,
    factory: impl Fn(&ControllerOption) -> Arc<dyn Controller> + Send + Sync + 'static,
) -> Result<(), ControllerError> {
    let mut controllers = CONTROLLERS.write();
    if controllers.contains_key(name) {
        return Err(ControllerError::Invalid(format!(
            "duplicated controller {}",
            name
        )));
    }
    controllers.insert(name.to_string(), Arc::new(factory));
    tracing::debug!(controller = name, "controller registered");
    Ok(())
}

/// Build every registered controller and hand it to `f`.
pub fn foreach_controller(opt: &ControllerOption, mut f: impl FnMut(Arc<dyn Controller>)) {
    for factory in CONTROLLERS.read().values() {
        f(factory(opt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeControlClient;
    use gangway_apis::FakeRecorder;

    #[test]
    fn registry_builds_default_controllers() {
        crate::register_default_controllers();
        // Registration is idempotent across repeated initialization.
        crate::register_default_controllers();

        let opt = ControllerOption {
            client: Arc::new(FakeControlClient::new()),
            recorder: Arc::new(FakeRecorder::new()),
            scheduler_names: vec!["gangway".to_string()],
            worker_num: 1,
            max_requeue_num: 3,
        };
        let mut names = Vec::new();
        foreach_controller(&opt, |controller| names.push(controller.name().to_string()));
        names.sort();
        assert!(names.contains(&"job-controller".to_string()));
        assert!(names.contains(&"queue-controller".to_string()));
    }
}
