//! The declarative store seam consumed by the controllers, with an
//! in-memory fake for tests.

use crate::error::ControllerError;
use async_trait::async_trait;
use gangway_apis::{Job, Pod, PodGroup, Queue};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Async client against the resource store. Updates use optimistic
/// concurrency: the store bumps `resource_version` on every write.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn get_queue(&self, name: &str) -> Result<Queue, ControllerError>;
    async fn update_queue(&self, queue: &Queue) -> Result<Queue, ControllerError>;
    async fn update_queue_status(&self, queue: &Queue) -> Result<Queue, ControllerError>;

    async fn get_pod_group(&self, namespace: &str, name: &str)
        -> Result<PodGroup, ControllerError>;

    async fn delete_command(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ControllerError>;
    async fn update_job_status(&self, job: &Job) -> Result<Job, ControllerError>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ControllerError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct FakeControlClient {
    queues: Mutex<HashMap<String, Queue>>,
    pod_groups: Mutex<HashMap<String, PodGroup>>,
    commands: Mutex<HashMap<String, ()>>,
    jobs: Mutex<HashMap<String, Job>>,
    pods: Mutex<HashMap<String, Pod>>,
    deleted_pods: Mutex<Vec<Pod>>,
}

fn key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

impl FakeControlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_queue(&self, queue: Queue) {
        self.queues.lock().insert(queue.name().to_string(), queue);
    }

    pub fn put_pod_group(&self, pg: PodGroup) {
        self.pod_groups
            .lock()
            .insert(key(pg.namespace(), pg.name()), pg);
    }

    pub fn put_command(&self, namespace: &str, name: &str) {
        self.commands.lock().insert(key(namespace, name), ());
    }

    pub fn has_command(&self, namespace: &str, name: &str) -> bool {
        self.commands.lock().contains_key(&key(namespace, name))
    }

    pub fn put_job(&self, job: Job) {
        self.jobs.lock().insert(key(job.namespace(), job.name()), job);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.jobs.lock().get(&key(namespace, name)).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<Queue> {
        self.queues.lock().get(name).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().values().cloned().collect()
    }

    /// Pods deleted since the last call.
    pub fn take_deleted_pods(&self) -> Vec<Pod> {
        std::mem::take(&mut *self.deleted_pods.lock())
    }
}

#[async_trait]
impl ControlClient for FakeControlClient {
    async fn get_queue(&self, name: &str) -> Result<Queue, ControllerError> {
        self.queues
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("queue", name))
    }

    async fn update_queue(&self, queue: &Queue) -> Result<Queue, ControllerError> {
        let mut queues = self.queues.lock();
        if !queues.contains_key(queue.name()) {
            return Err(ControllerError::not_found("queue", queue.name()));
        }
        let mut updated = queue.clone();
        updated.metadata.resource_version += 1;
        queues.insert(queue.name().to_string(), updated.clone());
        Ok(updated)
    }

    async fn update_queue_status(&self, queue: &Queue) -> Result<Queue, ControllerError> {
        let mut queues = self.queues.lock();
        let Some(stored) = queues.get_mut(queue.name()) else {
            return Err(ControllerError::not_found("queue", queue.name()));
        };
        stored.status = queue.status.clone();
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn get_pod_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodGroup, ControllerError> {
        self.pod_groups
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::not_found("podgroup", &key(namespace, name)))
    }

    async fn delete_command(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self.commands.lock().remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ControllerError::not_found("command", &key(namespace, name))),
        }
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ControllerError> {
        self.jobs
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::not_found("job", &key(namespace, name)))
    }

    async fn update_job_status(&self, job: &Job) -> Result<Job, ControllerError> {
        let mut jobs = self.jobs.lock();
        let Some(stored) = jobs.get_mut(&key(job.namespace(), job.name())) else {
            return Err(ControllerError::not_found(
                "job",
                &key(job.namespace(), job.name()),
            ));
        };
        stored.status = job.status.clone();
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ControllerError> {
        let mut pods = self.pods.lock();
        let pod_key = key(pod.namespace(), pod.name());
        if pods.contains_key(&pod_key) {
            return Err(ControllerError::Conflict {
                kind: "pod".to_string(),
                key: pod_key,
            });
        }
        let mut created = pod.clone();
        if created.metadata.uid.is_empty() {
            created.metadata.uid = uuid::Uuid::new_v4().to_string();
        }
        pods.insert(pod_key, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self.pods.lock().remove(&key(namespace, name)) {
            Some(pod) => {
                self.deleted_pods.lock().push(pod);
                Ok(())
            }
            None => Err(ControllerError::not_found("pod", &key(namespace, name))),
        }
    }
}
