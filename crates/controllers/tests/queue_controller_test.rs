//! Queue controller: command-driven open/close and status aggregation.

use gangway_apis::{
    Action, Command, FakeRecorder, ObjectMeta, PodGroup, PodGroupPhase, PodGroupSpec, Queue,
    QueueSpec, QueueState, TargetObject,
};
use gangway_controllers::apis::Request;
use gangway_controllers::client::FakeControlClient;
use gangway_controllers::framework::ControllerOption;
use gangway_controllers::queue::{CommandRequest, QueueController};
use std::sync::Arc;

fn controller_with(client: Arc<FakeControlClient>) -> QueueController {
    let opt = ControllerOption {
        client,
        recorder: Arc::new(FakeRecorder::new()),
        scheduler_names: vec!["gangway".to_string()],
        worker_num: 1,
        max_requeue_num: 3,
    };
    QueueController::new(&opt)
}

fn open_queue(name: &str) -> Queue {
    Queue {
        metadata: ObjectMeta::cluster_scoped(name),
        spec: QueueSpec::default(),
        status: Default::default(),
    }
}

fn pod_group(namespace: &str, name: &str, queue: &str, phase: PodGroupPhase) -> PodGroup {
    let mut pg = PodGroup {
        metadata: ObjectMeta::namespaced(namespace, name),
        spec: PodGroupSpec {
            queue: queue.to_string(),
            min_member: 1,
            ..Default::default()
        },
        status: Default::default(),
    };
    pg.status.phase = phase;
    pg
}

#[tokio::test]
async fn close_command_is_consumed_and_closes_the_queue() {
    let client = Arc::new(FakeControlClient::new());
    client.put_queue(open_queue("q1"));
    client.put_command("default", "close-q1");

    let controller = controller_with(Arc::clone(&client));

    let command = Command {
        metadata: ObjectMeta::namespaced("default", "close-q1"),
        action: Action::CloseQueue,
        target_object: TargetObject {
            kind: "Queue".to_string(),
            name: "q1".to_string(),
            namespace: None,
        },
    };
    controller.on_command_added(&command);

    // The command is deleted from the store before the action runs.
    controller
        .handle_command(&CommandRequest {
            namespace: "default".to_string(),
            name: "close-q1".to_string(),
            action: Action::CloseQueue,
            target: "q1".to_string(),
        })
        .await
        .unwrap();
    assert!(!client.has_command("default", "close-q1"));

    controller
        .sync(&Request::for_queue("q1", Action::CloseQueue))
        .await
        .unwrap();

    // No pod-groups in the queue, so it lands on Closed directly.
    let queue = client.queue("q1").unwrap();
    assert_eq!(queue.status.state, QueueState::Closed);
}

#[tokio::test]
async fn open_command_reopens_a_closed_queue() {
    let client = Arc::new(FakeControlClient::new());
    let mut queue = open_queue("q1");
    queue.status.state = QueueState::Closed;
    client.put_queue(queue);

    let controller = controller_with(Arc::clone(&client));
    controller
        .sync(&Request::for_queue("q1", Action::OpenQueue))
        .await
        .unwrap();

    assert_eq!(client.queue("q1").unwrap().status.state, QueueState::Open);
}

#[tokio::test]
async fn sync_recounts_pod_groups_by_phase() {
    let client = Arc::new(FakeControlClient::new());
    client.put_queue(open_queue("q1"));
    let controller = controller_with(Arc::clone(&client));

    for (name, phase) in [
        ("pg-pending", PodGroupPhase::Pending),
        ("pg-running", PodGroupPhase::Running),
        ("pg-inqueue", PodGroupPhase::Inqueue),
    ] {
        let pg = pod_group("ns", name, "q1", phase);
        client.put_pod_group(pg.clone());
        controller.on_pod_group_added(&pg);
    }

    controller
        .sync(&Request::for_queue("q1", Action::SyncQueue))
        .await
        .unwrap();

    let queue = client.queue("q1").unwrap();
    assert_eq!(queue.status.pending, 1);
    assert_eq!(queue.status.running, 1);
    assert_eq!(queue.status.inqueue, 1);
    assert_eq!(queue.status.state, QueueState::Open);
}

#[tokio::test]
async fn closing_queue_settles_once_pod_groups_drain() {
    let client = Arc::new(FakeControlClient::new());
    client.put_queue(open_queue("q1"));
    let controller = controller_with(Arc::clone(&client));

    let pg = pod_group("ns", "pg1", "q1", PodGroupPhase::Running);
    client.put_pod_group(pg.clone());
    controller.on_pod_group_added(&pg);

    // Close with a pod-group still inside: Closing, not Closed.
    controller
        .sync(&Request::for_queue("q1", Action::CloseQueue))
        .await
        .unwrap();
    assert_eq!(client.queue("q1").unwrap().status.state, QueueState::Closing);

    // Once the last pod-group leaves, sync settles the state to Closed.
    controller.on_pod_group_deleted(&pg);
    controller
        .sync(&Request::for_queue("q1", Action::SyncQueue))
        .await
        .unwrap();
    assert_eq!(client.queue("q1").unwrap().status.state, QueueState::Closed);
}
