//! Scheduler configuration: actions, plugin tiers, and extra arguments.
//!
//! Loaded from YAML of the shape:
//!
//! ```yaml
//! actions: "enqueue, allocate, backfill"
//! tiers:
//! - plugins:
//!   - name: priority
//!   - name: gang
//! - plugins:
//!   - name: proportion
//!     enabledReclaimable: false
//! configurations:
//! - name: allocate
//!   arguments:
//!     placeholder: "value"
//! ```

use crate::error::SchedulerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form plugin arguments.
pub type Arguments = HashMap<String, String>;

/// Default configuration applied when none is supplied.
pub const DEFAULT_SCHEDULER_CONF: &str = r#"
actions: "enqueue, allocate, backfill"
tiers:
- plugins:
  - name: priority
  - name: gang
  - name: conformance
- plugins:
  - name: predicates
  - name: proportion
  - name: nodeorder
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConf {
    #[serde(default)]
    pub actions: String,
    #[serde(default)]
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tier {
    #[serde(default)]
    pub plugins: Vec<PluginOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// Per-plugin switches. A missing flag means the callback is enabled; the
/// configuration only needs to spell out what it turns off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOption {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,

    #[serde(default)]
    pub enabled_job_order: Option<bool>,
    #[serde(default)]
    pub enabled_task_order: Option<bool>,
    #[serde(default)]
    pub enabled_queue_order: Option<bool>,
    #[serde(default)]
    pub enabled_namespace_order: Option<bool>,
    #[serde(default)]
    pub enabled_cluster_order: Option<bool>,
    #[serde(default)]
    pub enabled_predicate: Option<bool>,
    #[serde(default)]
    pub enabled_node_order: Option<bool>,
    #[serde(default)]
    pub enabled_preemptable: Option<bool>,
    #[serde(default)]
    pub enabled_reclaimable: Option<bool>,
    #[serde(default)]
    pub enabled_job_ready: Option<bool>,
    #[serde(default)]
    pub enabled_job_pipelined: Option<bool>,
    #[serde(default)]
    pub enabled_job_valid: Option<bool>,
    #[serde(default)]
    pub enabled_job_enqueueable: Option<bool>,
    #[serde(default)]
    pub enabled_job_enqueued: Option<bool>,
    #[serde(default)]
    pub enabled_job_starving: Option<bool>,
    #[serde(default)]
    pub enabled_target_job: Option<bool>,
    #[serde(default)]
    pub enabled_reserved_nodes: Option<bool>,
    #[serde(default)]
    pub enabled_victim: Option<bool>,
    #[serde(default)]
    pub enabled_overused: Option<bool>,
    #[serde(default)]
    pub enabled_underused: Option<bool>,
}

impl PluginOption {
    pub fn new(name: &str) -> Self {
        PluginOption {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Missing flags default to enabled.
pub fn enabled(flag: Option<bool>) -> bool {
    flag.unwrap_or(true)
}

impl SchedulerConf {
    /// The comma-separated action list, trimmed.
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Parse a YAML configuration string. An empty action list is invalid.
pub fn load_scheduler_conf(conf: &str) -> Result<SchedulerConf, SchedulerError> {
    let parsed: SchedulerConf = serde_yaml::from_str(conf)
        .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
    if parsed.action_names().is_empty() {
        return Err(SchedulerError::Configuration(
            "no actions configured".to_string(),
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_conf_parses() {
        let conf = load_scheduler_conf(DEFAULT_SCHEDULER_CONF).unwrap();
        assert_eq!(conf.action_names(), vec!["enqueue", "allocate", "backfill"]);
        assert_eq!(conf.tiers.len(), 2);
        assert_eq!(conf.tiers[0].plugins[0].name, "priority");
    }

    #[test]
    fn flags_default_to_enabled() {
        let conf = load_scheduler_conf(
            r#"
actions: "allocate"
tiers:
- plugins:
  - name: proportion
    enabledReclaimable: false
"#,
        )
        .unwrap();
        let opt = &conf.tiers[0].plugins[0];
        assert!(!enabled(opt.enabled_reclaimable));
        assert!(enabled(opt.enabled_queue_order));
    }

    #[test]
    fn empty_actions_rejected() {
        assert!(load_scheduler_conf("actions: \"\"").is_err());
        assert!(load_scheduler_conf("actions: [").is_err());
    }
}
