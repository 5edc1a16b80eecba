//! Consistent-hash sharding for running several scheduler replicas.
//!
//! When `MULTI_SCHEDULER_ENABLE=true`, each replica owns the objects whose
//! key hashes onto it in a ring built over `{base-name}-0 .. {base-name}-N-1`
//! (the replicas of a stateful deployment). Keys come from the first owner
//! reference when present, else the object name, so all pods of one job
//! land on the same scheduler.

use gangway_apis::{Pod, PodGroup};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Virtual points per member, for an even key distribution.
const RING_REPLICAS: usize = 50;

fn hash_of(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A consistent-hash ring over scheduler replica names.
#[derive(Debug, Clone)]
pub struct ShardRing {
    points: Vec<(u64, String)>,
}

impl ShardRing {
    pub fn new(members: &[String]) -> Self {
        let mut points = Vec::with_capacity(members.len() * RING_REPLICAS);
        for member in members {
            for i in 0..RING_REPLICAS {
                points.push((hash_of(&format!("{}#{}", member, i)), member.clone()));
            }
        }
        points.sort();
        ShardRing { points }
    }

    /// Owner of `key`: the first ring point at or after its hash,
    /// wrapping around.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let h = hash_of(key);
        let idx = self.points.partition_point(|(p, _)| *p < h);
        let (_, member) = &self.points[idx % self.points.len()];
        Some(member)
    }
}

/// Read the multi-scheduler environment: this replica's pod name and, when
/// sharding is enabled, the ring over all replicas.
///
/// Environment: `MULTI_SCHEDULER_ENABLE`, `SCHEDULER_POD_NAME` (of the
/// form `<base>-<ordinal>`), `SCHEDULER_NUM`.
pub fn multi_scheduler_info() -> (String, Option<ShardRing>) {
    let my_pod_name = std::env::var("SCHEDULER_POD_NAME").unwrap_or_default();
    let enabled = std::env::var("MULTI_SCHEDULER_ENABLE")
        .map(|v| v == "true")
        .unwrap_or(false);
    if !enabled {
        return (my_pod_name, None);
    }

    let scheduler_num = std::env::var("SCHEDULER_NUM")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1);

    let base = match my_pod_name.rfind('-') {
        Some(idx) => &my_pod_name[..idx],
        None => my_pod_name.as_str(),
    };
    let members: Vec<String> = (0..scheduler_num).map(|i| format!("{}-{}", base, i)).collect();

    tracing::info!(replicas = scheduler_num, "multi-scheduler sharding enabled");
    (my_pod_name, Some(ShardRing::new(&members)))
}

fn shard_key_for(owner: Option<&str>, name: &str) -> String {
    owner.unwrap_or(name).to_string()
}

/// Whether this scheduler replica is responsible for the pod. Pods naming a
/// different scheduler are never ours; with sharding on, the pod's job key
/// must also hash to this replica.
pub fn responsible_for_pod(
    pod: &Pod,
    scheduler_name: &str,
    my_pod_name: &str,
    ring: Option<&ShardRing>,
) -> bool {
    if pod.spec.scheduler_name != scheduler_name {
        return false;
    }
    match ring {
        Some(ring) => {
            let key = shard_key_for(pod.metadata.controller_name(), pod.name());
            ring.get(&key) == Some(my_pod_name)
        }
        None => true,
    }
}

/// Whether this replica is responsible for the node.
pub fn responsible_for_node(node_name: &str, my_pod_name: &str, ring: Option<&ShardRing>) -> bool {
    match ring {
        Some(ring) => ring.get(node_name) == Some(my_pod_name),
        None => true,
    }
}

/// Whether this replica is responsible for the pod-group.
pub fn responsible_for_pod_group(
    pg: &PodGroup,
    my_pod_name: &str,
    ring: Option<&ShardRing>,
) -> bool {
    match ring {
        Some(ring) => {
            let key = shard_key_for(pg.metadata.controller_name(), pg.name());
            ring.get(&key) == Some(my_pod_name)
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("gangway-scheduler-{}", i)).collect()
    }

    #[test]
    fn exactly_one_member_owns_each_key() {
        let members = members(4);
        let ring = ShardRing::new(&members);
        for i in 0..1000 {
            let key = format!("job-{}", i);
            let owner = ring.get(&key).expect("ring is non-empty");
            let owners = members.iter().filter(|m| ring.get(&key) == Some(m)).count();
            assert_eq!(owners, 1);
            assert!(members.iter().any(|m| m == owner));
        }
    }

    #[test]
    fn ownership_is_stable_per_key() {
        let ring = ShardRing::new(&members(3));
        let first = ring.get("job-42").map(String::from);
        for _ in 0..10 {
            assert_eq!(ring.get("job-42").map(String::from), first);
        }
    }

    #[test]
    fn distribution_touches_every_member() {
        let members = members(3);
        let ring = ShardRing::new(&members);
        let mut seen: std::collections::HashSet<String> = Default::default();
        for i in 0..500 {
            if let Some(owner) = ring.get(&format!("key-{}", i)) {
                seen.insert(owner.to_string());
            }
        }
        assert_eq!(seen.len(), members.len());
    }
}
