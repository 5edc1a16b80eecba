//! Helpers shared by the actions: feasibility filtering, scoring, and
//! dynamic best-first selection.

use crate::framework::Session;
use gangway_core::{FitError, FitErrors, NodeInfo, TaskInfo};
use std::collections::HashMap;

/// Run the session predicates over the candidate nodes. Returns the
/// passing node names and the per-node failures.
pub(crate) fn predicate_nodes(
    sess: &Session,
    task: &TaskInfo,
    candidates: &[String],
) -> (Vec<String>, FitErrors) {
    let mut passing = Vec::new();
    let mut fit_errors = FitErrors::new();

    for name in candidates {
        let Some(node) = sess.nodes.get(name) else {
            continue;
        };
        match sess.predicate_fn(task, node) {
            Ok(()) => passing.push(name.clone()),
            Err(err) => {
                fit_errors.set_node_error(name, FitError::new(task, name, vec![err.to_string()]));
            }
        }
    }

    (passing, fit_errors)
}

/// Score the candidate nodes for a task, highest first. Scoring runs
/// inline and results are joined before any decision. Ties break by node
/// name for determinism.
pub(crate) fn prioritize_nodes(
    sess: &Session,
    task: &TaskInfo,
    candidates: &[String],
) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for name in candidates {
        let Some(node) = sess.nodes.get(name) else {
            continue;
        };
        match sess.node_order_fn(task, node) {
            Ok(score) => {
                scores.insert(name.clone(), score);
            }
            Err(err) => {
                tracing::warn!(node = %name, %err, "node scoring failed");
                scores.insert(name.clone(), 0.0);
            }
        }
    }

    let node_refs: Vec<&NodeInfo> = candidates
        .iter()
        .filter_map(|name| sess.nodes.get(name))
        .collect();
    match sess.batch_node_order_fn(task, &node_refs) {
        Ok(batch) => {
            for (name, score) in batch {
                *scores.entry(name).or_insert(0.0) += score;
            }
        }
        Err(err) => tracing::warn!(%err, "batch node scoring failed"),
    }

    let mut scored: Vec<(String, f64)> = scores.into_iter().collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

/// Index of the best element under `better`, a strict "comes first"
/// comparison.
pub(crate) fn pick_best<T>(items: &[T], better: impl Fn(&T, &T) -> bool) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..items.len() {
        if better(&items[i], &items[best]) {
            best = i;
        }
    }
    Some(best)
}
