//! Shared fixtures for scheduler integration tests.

use gangway_apis::quantity::build_resource_list;
use gangway_apis::{
    annotations, Container, Node, NodeStatus, ObjectMeta, Pod, PodGroup, PodGroupPhase,
    PodGroupSpec, PodPhase, PodSpec, Queue, QueueSpec, ResourceList,
};
use gangway_scheduler::cache::fakes::FakeCollaborators;
use gangway_scheduler::cache::{CacheCollaborators, SchedulerCache};
use gangway_scheduler::conf::{PluginOption, Tier};
use std::collections::HashMap;

pub const SCHEDULER_NAME: &str = "gangway";

pub fn build_cache() -> (SchedulerCache, FakeCollaborators) {
    let (collab, fakes): (CacheCollaborators, FakeCollaborators) = FakeCollaborators::new();
    let cache = SchedulerCache::new(SCHEDULER_NAME, "default", collab);
    (cache, fakes)
}

pub fn build_node(name: &str, cpu: &str, memory: &str) -> Node {
    Node {
        metadata: ObjectMeta::cluster_scoped(name),
        spec: Default::default(),
        status: NodeStatus {
            allocatable: build_resource_list(cpu, memory),
            capacity: build_resource_list(cpu, memory),
            ready: true,
        },
    }
}

pub fn build_pod(
    namespace: &str,
    name: &str,
    node_name: &str,
    phase: PodPhase,
    requests: ResourceList,
    group_name: &str,
    extra_annotations: HashMap<String, String>,
) -> Pod {
    let mut metadata = ObjectMeta::namespaced(namespace, name);
    metadata
        .annotations
        .insert(annotations::GROUP_NAME_KEY.to_string(), group_name.to_string());
    for (k, v) in extra_annotations {
        metadata.annotations.insert(k, v);
    }

    Pod {
        metadata,
        spec: PodSpec {
            node_name: node_name.to_string(),
            scheduler_name: SCHEDULER_NAME.to_string(),
            containers: vec![Container {
                name: "main".to_string(),
                requests,
            }],
            ..Default::default()
        },
        status: gangway_apis::PodStatus {
            phase,
            ..Default::default()
        },
    }
}

pub fn build_pod_group(
    namespace: &str,
    name: &str,
    queue: &str,
    min_member: i32,
    phase: PodGroupPhase,
) -> PodGroup {
    let mut pg = PodGroup {
        metadata: ObjectMeta::namespaced(namespace, name),
        spec: PodGroupSpec {
            min_member,
            queue: queue.to_string(),
            ..Default::default()
        },
        status: Default::default(),
    };
    pg.status.phase = phase;
    pg
}

pub fn build_queue(name: &str, weight: i32) -> Queue {
    Queue {
        metadata: ObjectMeta::cluster_scoped(name),
        spec: QueueSpec {
            weight,
            capability: None,
            reclaimable: None,
        },
        status: Default::default(),
    }
}

/// The default two-tier plugin layout used across tests.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier {
            plugins: vec![
                PluginOption::new("priority"),
                PluginOption::new("gang"),
                PluginOption::new("conformance"),
            ],
        },
        Tier {
            plugins: vec![
                PluginOption::new("predicates"),
                PluginOption::new("proportion"),
                PluginOption::new("nodeorder"),
            ],
        },
    ]
}
