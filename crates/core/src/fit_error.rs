//! Aggregated reasons why a task failed to fit on cluster nodes.

use crate::task::TaskInfo;
use std::collections::HashMap;
use std::fmt;

/// Why one task does not fit on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct FitError {
    pub task_namespace: String,
    pub task_name: String,
    pub node_name: String,
    pub reasons: Vec<String>,
}

impl FitError {
    pub fn new(task: &TaskInfo, node_name: &str, reasons: Vec<String>) -> Self {
        FitError {
            task_namespace: task.namespace.clone(),
            task_name: task.name.clone(),
            node_name: node_name.to_string(),
            reasons,
        }
    }
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {}/{} on node {}: {}",
            self.task_namespace,
            self.task_name,
            self.node_name,
            self.reasons.join(", ")
        )
    }
}

/// Per-node fit errors for one task, with histogram aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitErrors {
    nodes: HashMap<String, FitError>,
}

impl FitErrors {
    pub fn new() -> Self {
        FitErrors::default()
    }

    pub fn set_node_error(&mut self, node_name: &str, err: FitError) {
        self.nodes.insert(node_name.to_string(), err);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Human-readable summary: reasons histogram sorted lexicographically.
    pub fn error(&self) -> String {
        let mut histogram: HashMap<&str, usize> = HashMap::new();
        for fit in self.nodes.values() {
            for reason in &fit.reasons {
                *histogram.entry(reason.as_str()).or_insert(0) += 1;
            }
        }

        let mut parts: Vec<String> = histogram
            .into_iter()
            .map(|(reason, count)| format!("{} {}", count, reason))
            .collect();
        parts.sort();

        format!(
            "0/{} nodes are available: {}",
            self.nodes.len(),
            parts.join(", ")
        )
    }
}

impl fmt::Display for FitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error())
    }
}
