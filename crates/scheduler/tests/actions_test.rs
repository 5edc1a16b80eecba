//! End-to-end action tests over a fake cluster: gang allocation, gang
//! deficit, and cross-queue reclaim.

mod common;

use common::*;
use gangway_apis::quantity::build_resource_list;
use gangway_apis::{PodGroupPhase, PodPhase, WatchEvent};
use gangway_core::TaskStatus;
use gangway_scheduler::actions::{allocate::Allocate, enqueue::Enqueue, reclaim::Reclaim};
use gangway_scheduler::cache::ClusterEvent;
use gangway_scheduler::framework::{self, Action};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn gang_allocation_binds_all_members() {
    framework::register_default_plugins();

    let (cache, fakes) = build_cache();
    cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue("q1", 1))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        2,
        PodGroupPhase::Inqueue,
    ))));
    for name in ["n1", "n2"] {
        cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
            name, "1", "1Gi",
        ))));
    }
    for name in ["t1", "t2"] {
        cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
            "c1",
            name,
            "",
            PodPhase::Pending,
            build_resource_list("1", "1Gi"),
            "pg1",
            HashMap::new(),
        ))));
    }

    let cache = Arc::new(cache);
    let (_stop_tx, stop_rx) = watch::channel(false);
    Arc::clone(&cache).spawn_bind_worker(stop_rx);

    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());
    Allocate.execute(&mut sess);

    let job = sess.jobs.get("c1/pg1").expect("job in session");
    assert_eq!(job.count_in(TaskStatus::Binding), 2);
    assert!(job.ready());

    // Both members reach the binder, each on its own node.
    assert!(fakes.binder.wait_for_binds(2, Duration::from_secs(3)).await);
    let binds = fakes.binder.binds();
    assert_eq!(binds.len(), 2);
    let nodes: std::collections::HashSet<&String> = binds.values().collect();
    assert_eq!(nodes.len(), 2);

    framework::close_session(sess).await;
}

#[tokio::test]
async fn gang_deficit_discards_partial_allocation() {
    framework::register_default_plugins();

    let (cache, fakes) = build_cache();
    cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue("q1", 1))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        2,
        PodGroupPhase::Inqueue,
    ))));
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "1", "1Gi",
    ))));
    for name in ["t1", "t2"] {
        cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
            "c1",
            name,
            "",
            PodPhase::Pending,
            build_resource_list("1", "1Gi"),
            "pg1",
            HashMap::new(),
        ))));
    }

    let cache = Arc::new(cache);
    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());
    Allocate.execute(&mut sess);

    let job = sess.jobs.get("c1/pg1").expect("job in session");
    // The statement rolled back: nothing allocated, nothing bound.
    assert_eq!(job.count_in(TaskStatus::Pending), 2);
    assert_eq!(job.count_in(TaskStatus::Allocated), 0);
    assert_eq!(job.count_in(TaskStatus::Binding), 0);
    assert!(!job.ready());
    // The unplaceable member left a fit error behind.
    assert!(!job.nodes_fit_errors.is_empty());

    let node = sess.nodes.get("n1").expect("node in session");
    assert_eq!(node.idle.milli_cpu, 1000.0);
    assert!(fakes.binder.binds().is_empty());
}

#[tokio::test]
async fn reclaim_takes_back_exactly_what_is_needed() {
    framework::register_default_plugins();

    let (cache, fakes) = build_cache();
    for (queue, weight) in [("q1", 1), ("q2", 1)] {
        cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue(
            queue, weight,
        ))));
    }
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        0,
        PodGroupPhase::Inqueue,
    ))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg2",
        "q2",
        1,
        PodGroupPhase::Inqueue,
    ))));
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "3", "3Gi",
    ))));

    let preemptable: HashMap<String, String> = HashMap::from([(
        gangway_apis::annotations::PREEMPTABLE_KEY.to_string(),
        "true".to_string(),
    )]);
    for name in ["preemptee1", "preemptee2", "preemptee3"] {
        // Only running, preemptable tasks are reclaim candidates; mark all
        // three so the share math picks the victim count.
        cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
            "c1",
            name,
            "n1",
            PodPhase::Running,
            build_resource_list("1", "1G"),
            "pg1",
            preemptable.clone(),
        ))));
    }
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "preemptor1",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1G"),
        "pg2",
        HashMap::new(),
    ))));

    let cache = Arc::new(cache);
    let (_stop_tx, stop_rx) = watch::channel(false);
    Arc::clone(&cache).spawn_bind_worker(stop_rx);

    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());
    Reclaim.execute(&mut sess);

    assert!(
        fakes
            .evictor
            .wait_for_evictions(1, Duration::from_secs(3))
            .await
    );
    assert_eq!(fakes.evictor.evicts().len(), 1);

    // The freed resources go straight to the reclaimer, which enters
    // Binding in the same cycle.
    let job = sess.jobs.get("c1/pg2").expect("job in session");
    assert_eq!(job.count_in(TaskStatus::Binding), 1);
    assert!(fakes.binder.wait_for_binds(1, Duration::from_secs(3)).await);
    assert_eq!(
        fakes.binder.binds().get("c1/preemptor1").map(String::as_str),
        Some("n1")
    );
}

#[tokio::test]
async fn enqueue_admits_pending_jobs() {
    framework::register_default_plugins();

    let (cache, _fakes) = build_cache();
    cache.handle_event(ClusterEvent::Queue(WatchEvent::Added(build_queue("q1", 1))));
    cache.handle_event(ClusterEvent::Node(WatchEvent::Added(build_node(
        "n1", "4", "8Gi",
    ))));
    cache.handle_event(ClusterEvent::PodGroup(WatchEvent::Added(build_pod_group(
        "c1",
        "pg1",
        "q1",
        1,
        PodGroupPhase::Pending,
    ))));
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "t1",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    ))));

    let cache = Arc::new(cache);
    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());
    Enqueue.execute(&mut sess);

    let job = sess.jobs.get("c1/pg1").expect("job in session");
    let phase = job.pod_group.as_ref().map(|pg| pg.status.phase);
    assert_eq!(phase, Some(PodGroupPhase::Inqueue));
}
