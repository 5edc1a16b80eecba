//! Namespace weights derived from resource quotas.
//!
//! Each namespace carries a weight: the maximum of the weights annotated on
//! its resource quotas, defaulting to 1. Weights live in a keyed max-heap
//! so quota updates are cheap and the top weight is always at hand.

use gangway_apis::{annotations, parse_quantity, ResourceQuota, ResourceQuotaStatus};
use std::collections::{BinaryHeap, HashMap};

pub const DEFAULT_NAMESPACE_WEIGHT: i64 = 1;

/// Point-in-time view of a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceInfo {
    pub name: String,
    pub weight: i64,
    pub quota_status: HashMap<String, ResourceQuotaStatus>,
}

impl NamespaceInfo {
    pub fn weight(&self) -> i64 {
        if self.weight == 0 {
            DEFAULT_NAMESPACE_WEIGHT
        } else {
            self.weight
        }
    }
}

/// Max-heap keyed by quota name with upsert and delete. Stale heap entries
/// are skipped lazily on peek.
#[derive(Debug, Clone, Default)]
struct WeightHeap {
    live: HashMap<String, i64>,
    heap: BinaryHeap<(i64, String)>,
}

impl WeightHeap {
    fn upsert(&mut self, name: &str, weight: i64) {
        self.live.insert(name.to_string(), weight);
        self.heap.push((weight, name.to_string()));
    }

    fn delete(&mut self, name: &str) {
        self.live.remove(name);
    }

    fn peek(&mut self) -> Option<i64> {
        while let Some((weight, name)) = self.heap.peek() {
            if self.live.get(name) == Some(weight) {
                return Some(*weight);
            }
            self.heap.pop();
        }
        None
    }
}

/// Collects the quota weights and statuses of one namespace.
#[derive(Debug, Clone)]
pub struct NamespaceCollection {
    pub name: String,
    weights: WeightHeap,
    quota_status: HashMap<String, ResourceQuotaStatus>,
}

fn quota_weight(quota: &ResourceQuota) -> i64 {
    quota
        .spec
        .hard
        .get(annotations::NAMESPACE_WEIGHT_KEY)
        .and_then(|q| parse_quantity(q).ok())
        .map(|v| v as i64)
        .unwrap_or(DEFAULT_NAMESPACE_WEIGHT)
}

impl NamespaceCollection {
    pub fn new(name: &str) -> Self {
        let mut collection = NamespaceCollection {
            name: name.to_string(),
            weights: WeightHeap::default(),
            quota_status: HashMap::new(),
        };
        // Seed with the default so an empty collection still has a weight.
        collection
            .weights
            .upsert(annotations::NAMESPACE_WEIGHT_KEY, DEFAULT_NAMESPACE_WEIGHT);
        collection
    }

    pub fn update(&mut self, quota: &ResourceQuota) {
        self.weights.upsert(quota.name(), quota_weight(quota));
        self.quota_status
            .insert(quota.name().to_string(), quota.status.clone());
    }

    pub fn delete(&mut self, quota: &ResourceQuota) {
        self.weights.delete(quota.name());
        self.quota_status.remove(quota.name());
    }

    /// Clone out a `NamespaceInfo` carrying the current top weight.
    pub fn snapshot(&mut self) -> NamespaceInfo {
        let weight = self.weights.peek().unwrap_or(DEFAULT_NAMESPACE_WEIGHT);
        NamespaceInfo {
            name: self.name.clone(),
            weight,
            quota_status: self.quota_status.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::{ObjectMeta, ResourceQuotaSpec};

    fn quota(name: &str, weight: Option<i64>) -> ResourceQuota {
        let mut spec = ResourceQuotaSpec::default();
        if let Some(w) = weight {
            spec.hard
                .insert(annotations::NAMESPACE_WEIGHT_KEY.to_string(), w.to_string());
        }
        ResourceQuota {
            metadata: ObjectMeta::namespaced("team-a", name),
            spec,
            status: Default::default(),
        }
    }

    #[test]
    fn weight_is_max_across_quotas() {
        let mut nc = NamespaceCollection::new("team-a");
        nc.update(&quota("small", Some(2)));
        nc.update(&quota("large", Some(8)));
        assert_eq!(nc.snapshot().weight, 8);

        nc.delete(&quota("large", Some(8)));
        assert_eq!(nc.snapshot().weight, 2);
    }

    #[test]
    fn unannotated_quota_defaults_to_one() {
        let mut nc = NamespaceCollection::new("team-a");
        nc.update(&quota("plain", None));
        assert_eq!(nc.snapshot().weight, 1);
    }

    #[test]
    fn upsert_replaces_previous_weight() {
        let mut nc = NamespaceCollection::new("team-a");
        nc.update(&quota("q", Some(10)));
        nc.update(&quota("q", Some(3)));
        assert_eq!(nc.snapshot().weight, 3);
    }
}
