//! Statement rollback: discard must restore the exact pre-statement state.

mod common;

use common::*;
use gangway_apis::quantity::build_resource_list;
use gangway_apis::{PodGroupPhase, PodPhase, WatchEvent};
use gangway_core::{Resource, TaskStatus};
use gangway_scheduler::cache::ClusterEvent;
use gangway_scheduler::framework;
use std::collections::HashMap;
use std::sync::Arc;

fn task_of<'a>(
    sess: &'a framework::Session,
    job_id: &str,
    status: TaskStatus,
) -> &'a gangway_core::TaskInfo {
    sess.jobs[job_id]
        .tasks_in(status)
        .into_iter()
        .next()
        .expect("task present")
}

#[tokio::test]
async fn discard_restores_pre_statement_state() {
    framework::register_default_plugins();

    let (cache, _fakes) = build_cache();
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
    // A running victim and a pending task to allocate.
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "runner",
        "n1",
        PodPhase::Running,
        build_resource_list("2", "2Gi"),
        "pg1",
        HashMap::new(),
    ))));
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "waiter",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    ))));

    let cache = Arc::new(cache);
    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());

    let idle_before: Resource = sess.nodes["n1"].idle.clone();
    let releasing_before: Resource = sess.nodes["n1"].releasing.clone();
    let allocated_before: Resource = sess.jobs["c1/pg1"].allocated.clone();
    let total_before: Resource = sess.jobs["c1/pg1"].total_request.clone();
    let waiter = task_of(&sess, "c1/pg1", TaskStatus::Pending).clone();
    let runner = task_of(&sess, "c1/pg1", TaskStatus::Running).clone();

    let mut stmt = sess.statement();
    stmt.allocate(&mut sess, &waiter, "n1").unwrap();
    stmt.evict(&mut sess, &runner, "making room").unwrap();

    // The statement really did something before the rollback.
    assert_eq!(
        sess.jobs["c1/pg1"].tasks[&waiter.uid].status(),
        TaskStatus::Allocated
    );
    assert_eq!(
        sess.jobs["c1/pg1"].tasks[&runner.uid].status(),
        TaskStatus::Releasing
    );
    assert_ne!(sess.nodes["n1"].idle, idle_before);

    stmt.discard(&mut sess);

    let job = &sess.jobs["c1/pg1"];
    assert_eq!(job.tasks[&waiter.uid].status(), TaskStatus::Pending);
    assert_eq!(job.tasks[&waiter.uid].node_name(), "");
    assert_eq!(job.tasks[&runner.uid].status(), TaskStatus::Running);
    assert_eq!(job.allocated, allocated_before);
    assert_eq!(job.total_request, total_before);

    let node = &sess.nodes["n1"];
    assert_eq!(node.idle, idle_before);
    assert_eq!(node.releasing, releasing_before);
    assert_eq!(node.used.milli_cpu, 2000.0);
}

#[tokio::test]
async fn session_wrappers_delegate_to_statements() {
    framework::register_default_plugins();

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
    cache.handle_event(ClusterEvent::Pod(WatchEvent::Added(build_pod(
        "c1",
        "solo",
        "",
        PodPhase::Pending,
        build_resource_list("1", "1Gi"),
        "pg1",
        HashMap::new(),
    ))));

    let cache = Arc::new(cache);
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    Arc::clone(&cache).spawn_bind_worker(stop_rx);

    let mut sess = framework::open_session(Arc::clone(&cache), default_tiers(), Vec::new());
    let solo = task_of(&sess, "c1/pg1", TaskStatus::Pending).clone();

    // MinAvailable is 1, so a single allocation makes the gang ready and
    // dispatches immediately.
    sess.allocate(&solo, "n1").unwrap();
    assert_eq!(
        sess.jobs["c1/pg1"].tasks[&solo.uid].status(),
        TaskStatus::Binding
    );
    assert!(
        fakes
            .binder
            .wait_for_binds(1, std::time::Duration::from_secs(3))
            .await
    );
}
