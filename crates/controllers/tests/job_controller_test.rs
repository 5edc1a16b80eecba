//! Job controller: suspend/resume lifecycle and the restart retry limit.

use gangway_apis::{
    Action, Command, Job, JobPhase, JobSpec, ObjectMeta, PodPhase, TargetObject, TaskSpec,
};
use gangway_controllers::apis::Request;
use gangway_controllers::client::FakeControlClient;
use gangway_controllers::framework::ControllerOption;
use gangway_controllers::job::JobController;
use std::sync::Arc;

fn controller_with(client: Arc<FakeControlClient>) -> JobController {
    let opt = ControllerOption {
        client,
        recorder: Arc::new(gangway_apis::FakeRecorder::new()),
        scheduler_names: vec!["gangway".to_string()],
        worker_num: 1,
        max_requeue_num: 3,
    };
    JobController::new(&opt)
}

fn batch_job(name: &str, replicas: i32, min_available: i32, max_retry: i32) -> Job {
    Job {
        metadata: ObjectMeta::namespaced("ns", name),
        spec: JobSpec {
            scheduler_name: "gangway".to_string(),
            queue: "default".to_string(),
            min_available,
            max_retry,
            tasks: vec![TaskSpec {
                name: "workers".to_string(),
                replicas,
                ..Default::default()
            }],
        },
        status: Default::default(),
    }
}

fn job_phase(client: &FakeControlClient, name: &str) -> JobPhase {
    client.job("ns", name).unwrap().status.state.phase
}

async fn sync(controller: &JobController, name: &str, action: Option<Action>) {
    controller
        .sync(&Request::for_job("ns", name, action))
        .await
        .unwrap();
}

/// Drive every pod of the job to Running through pod update events.
fn mark_pods_running(controller: &JobController, client: &FakeControlClient) {
    for mut pod in client.pods() {
        pod.status.phase = PodPhase::Running;
        controller.on_pod_updated(&pod);
    }
}

#[tokio::test]
async fn abort_then_resume_walks_the_state_machine() {
    let client = Arc::new(FakeControlClient::new());
    let job = batch_job("j1", 2, 2, 3);
    client.put_job(job.clone());

    let controller = controller_with(Arc::clone(&client));
    controller.on_job_added(&job);

    // First sync stamps the pods.
    sync(&controller, "j1", None).await;
    assert_eq!(client.pods().len(), 2);
    assert_eq!(job_phase(&client, "j1"), JobPhase::Pending);

    // Pods come up; the job goes Running.
    mark_pods_running(&controller, &client);
    sync(&controller, "j1", None).await;
    assert_eq!(job_phase(&client, "j1"), JobPhase::Running);

    // Abort: both pods are deleted (soft retain keeps none of them).
    let abort = Command {
        metadata: ObjectMeta::namespaced("ns", "abort-j1"),
        action: Action::AbortJob,
        target_object: TargetObject {
            kind: "Job".to_string(),
            name: "j1".to_string(),
            namespace: Some("ns".to_string()),
        },
    };
    client.put_command("ns", "abort-j1");
    controller.on_command(&abort).await.unwrap();
    assert!(!client.has_command("ns", "abort-j1"));

    sync(&controller, "j1", Some(Action::AbortJob)).await;
    assert!(client.pods().is_empty());
    assert_eq!(job_phase(&client, "j1"), JobPhase::Aborting);

    // Pod counts settled to zero: the next tick lands on Aborted.
    sync(&controller, "j1", None).await;
    assert_eq!(job_phase(&client, "j1"), JobPhase::Aborted);

    // Resume bumps the retry count and goes through Restarting.
    sync(&controller, "j1", Some(Action::ResumeJob)).await;
    assert_eq!(job_phase(&client, "j1"), JobPhase::Restarting);
    assert_eq!(client.job("ns", "j1").unwrap().status.retry_count, 1);

    // Enough replicas can come back: Restarting settles into Pending.
    sync(&controller, "j1", None).await;
    assert_eq!(job_phase(&client, "j1"), JobPhase::Pending);

    // And the pods are recreated.
    sync(&controller, "j1", None).await;
    assert_eq!(client.pods().len(), 2);
}

#[tokio::test]
async fn restart_budget_exhaustion_fails_the_job() {
    let client = Arc::new(FakeControlClient::new());
    let job = batch_job("j2", 1, 1, 2);
    client.put_job(job.clone());

    let controller = controller_with(Arc::clone(&client));
    controller.on_job_added(&job);
    sync(&controller, "j2", None).await;
    assert_eq!(client.pods().len(), 1);

    // First restart cycle: retry 1 of 2, back to Pending.
    sync(&controller, "j2", Some(Action::RestartJob)).await;
    assert_eq!(job_phase(&client, "j2"), JobPhase::Restarting);
    sync(&controller, "j2", None).await;
    assert_eq!(job_phase(&client, "j2"), JobPhase::Pending);
    sync(&controller, "j2", None).await;
    assert_eq!(client.pods().len(), 1);

    // Second restart cycle hits the budget: the job fails for good.
    sync(&controller, "j2", Some(Action::RestartJob)).await;
    assert_eq!(client.job("ns", "j2").unwrap().status.retry_count, 2);
    sync(&controller, "j2", None).await;
    assert_eq!(job_phase(&client, "j2"), JobPhase::Failed);

    // A terminal job creates nothing further.
    sync(&controller, "j2", None).await;
    assert!(client.pods().is_empty());
}

#[tokio::test]
async fn completed_tasks_complete_the_job() {
    let client = Arc::new(FakeControlClient::new());
    let job = batch_job("j3", 1, 1, 3);
    client.put_job(job.clone());

    let controller = controller_with(Arc::clone(&client));
    controller.on_job_added(&job);
    sync(&controller, "j3", None).await;

    for mut pod in client.pods() {
        pod.status.phase = PodPhase::Succeeded;
        controller.on_pod_updated(&pod);
    }

    // Running-state sync sees every replica finished and starts completing.
    {
        let mut stored = client.job("ns", "j3").unwrap();
        stored.status.state.phase = JobPhase::Running;
        client.put_job(stored.clone());
        controller.on_job_updated(&stored);
    }

    sync(&controller, "j3", None).await;
    assert_eq!(job_phase(&client, "j3"), JobPhase::Completing);

    sync(&controller, "j3", None).await;
    assert_eq!(job_phase(&client, "j3"), JobPhase::Completed);
}
