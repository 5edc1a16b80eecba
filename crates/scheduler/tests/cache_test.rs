//! Cache behavior: snapshot isolation, event handling, binding pipeline.

mod common;

use common::*;
use gangway_apis::quantity::build_resource_list;
use gangway_apis::{PodGroupPhase, PodPhase, WatchEvent};
use gangway_core::TaskStatus;
use gangway_scheduler::cache::sharding::ShardRing;
use gangway_scheduler::cache::ClusterEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[test]
fn snapshot_does_not_alias_cache_state() {
    let (cache, _fakes) = build_cache();
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "4", "8Gi",
    ))));
    cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue("q1", 1))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        1,
        PodGroupPhase::Pending,
    ))));

    let before = cache.snapshot();
    assert_eq!(before.nodes.len(), 1);
    assert_eq!(before.jobs.len(), 1);

    // Mutate the cache after the snapshot.
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "t1",
        "n1",
        PodPhase::Running,
        build_resource_list("2", "2Gi"),
        "pg1",
        HashMap::new(),
    ))));
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n2", "4", "8Gi",
    ))));

    // The old snapshot is untouched.
    assert_eq!(before.nodes.len(), 1);
    assert!(before.jobs["c1/pg1"].tasks.is_empty());
    assert_eq!(before.nodes["n1"].idle.milli_cpu, 4000.0);

    let after = cache.snapshot();
    assert_eq!(after.nodes.len(), 2);
    assert_eq!(after.jobs["c1/pg1"].tasks.len(), 1);
    assert_eq!(after.nodes["n1"].idle.milli_cpu, 2000.0);
}

#[test]
fn pod_group_defaults_to_the_default_queue() {
    let (cache, _fakes) = build_cache();
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "",
        1,
        PodGroupPhase::Pending,
    ))));

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.jobs["c1/pg1"].queue, "default");
}

#[test]
fn pods_for_other_schedulers_are_ignored() {
    let (cache, _fakes) = build_cache();
    let mut pod = build_pod(
        "c1",
        "t1",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    );
    pod.spec.scheduler_name = "someone-else".to_string();
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(pod)));

    assert!(cache.snapshot().jobs.is_empty());
}

#[test]
fn deleting_last_pod_drops_podgroupless_job() {
    let (cache, _fakes) = build_cache();
    let pod = build_pod(
        "c1",
        "t1",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    );
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(pod.clone())));
    assert_eq!(cache.task_status("c1/pg1", &pod.metadata.uid), Some(TaskStatus::Pending));

    cache.handle_event(ClusterEvent::Pod(WatchEvent::Deleted(pod)));
    assert!(cache.snapshot().jobs.is_empty());
}

#[test]
fn oversubscribed_node_goes_out_of_sync() {
    let (cache, _fakes) = build_cache();
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "1", "1Gi",
    ))));
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "t1",
        "n1",
        PodPhase::Running,
        build_resource_list("2", "2Gi"),
        "pg1",
        HashMap::new(),
    ))));

    let snapshot = cache.snapshot();
    let node = &snapshot.nodes["n1"];
    assert_eq!(node.state.phase, gangway_core::NodePhase::NotReady);
    assert_eq!(node.state.reason, "OutOfSync");
}

#[tokio::test]
async fn bind_pipeline_marks_tasks_bound() {
    let (cache, fakes) = build_cache();
    cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue("q1", 1))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        1,
        PodGroupPhase::Inqueue,
    ))));
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "4", "8Gi",
    ))));
    let pod = build_pod(
        "c1",
        "t1",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    );
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(pod.clone())));

    let cache = Arc::new(cache);
    let (_stop_tx, stop_rx) = watch::channel(false);
    Arc::clone(&cache).spawn_bind_worker(stop_rx);

    let snapshot = cache.snapshot();
    let mut task = snapshot.jobs["c1/pg1"].tasks[&pod.metadata.uid].clone();
    task.tx.node_name = "n1".to_string();
    cache.add_bind_task(&task).unwrap();

    assert_eq!(
        cache.task_status("c1/pg1", &pod.metadata.uid),
        Some(TaskStatus::Binding)
    );

    assert!(fakes.binder.wait_for_binds(1, Duration::from_secs(3)).await);
    // Give the worker a beat to write the Bound status back.
    for _ in 0..50 {
        if cache.task_status("c1/pg1", &pod.metadata.uid) == Some(TaskStatus::Bound) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        cache.task_status("c1/pg1", &pod.metadata.uid),
        Some(TaskStatus::Bound)
    );
}

#[test]
fn sharded_cache_ignores_foreign_pods() {
    let (cache, _fakes) = build_cache();
    let members: Vec<String> = (0..3).map(|i| format!("gangway-{}", i)).collect();
    let ring = ShardRing::new(&members);

    // Find a pod name owned by a different member than ours.
    let mut cache = cache;
    let mine = "gangway-0";
    cache.set_sharding(mine, Some(ring.clone()));

    let mut foreign_name = None;
    for i in 0..100 {
        let name = format!("pod-{}", i);
        if ring.get(&name) != Some(mine) {
            foreign_name = Some(name);
            break;
        }
    }
    let foreign_name = foreign_name.expect("some key hashes elsewhere");

    let pod = build_pod(
        "c1",
        &foreign_name,
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    );
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(pod)));
    assert!(cache.snapshot().jobs.is_empty());
}
