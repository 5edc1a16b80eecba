//! Controller-side job cache: the local store reconciliation reads from.

use crate::apis::{job_key, job_key_of, job_key_of_pod, JobInfo};
use crate::error::ControllerError;
use crate::workqueue::RateLimitingQueue;
use gangway_apis::{Job, Pod, PodPhase};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Per-task restart budget applied when a task spec leaves it unset.
const DEFAULT_MAX_RETRY: i32 = 3;

pub struct JobCache {
    job_infos: Mutex<HashMap<String, JobInfo>>,
    deleted_jobs: Arc<RateLimitingQueue<String>>,
}

fn job_terminated(ji: &JobInfo) -> bool {
    ji.job.is_none() && ji.pod_count() == 0
}

impl JobCache {
    pub fn new() -> Self {
        JobCache {
            job_infos: Mutex::new(HashMap::new()),
            deleted_jobs: Arc::new(RateLimitingQueue::new()),
        }
    }

    /// Clone of the job's info; fails when unknown or not yet ready.
    pub fn get(&self, key: &str) -> Result<JobInfo, ControllerError> {
        let infos = self.job_infos.lock();
        let ji = infos
            .get(key)
            .ok_or_else(|| ControllerError::not_found("job", key))?;
        if ji.job.is_none() {
            return Err(ControllerError::Invalid(format!("job {} is not ready", key)));
        }
        Ok(ji.clone())
    }

    pub fn add(&self, job: &Job) -> Result<(), ControllerError> {
        let mut infos = self.job_infos.lock();
        let key = job_key_of(job);
        if let Some(existing) = infos.get_mut(&key) {
            if existing.job.is_none() {
                existing.set_job(job.clone());
                return Ok(());
            }
            return Err(ControllerError::Invalid(format!("duplicated job {}", key)));
        }
        let mut ji = JobInfo::new(job.namespace(), job.name());
        ji.set_job(job.clone());
        infos.insert(key, ji);
        Ok(())
    }

    pub fn update(&self, job: &Job) -> Result<(), ControllerError> {
        let mut infos = self.job_infos.lock();
        let key = job_key_of(job);
        match infos.get_mut(&key) {
            Some(ji) => {
                ji.job = Some(job.clone());
                Ok(())
            }
            None => Err(ControllerError::not_found("job", &key)),
        }
    }

    /// Forget the stored job and queue its cleanup.
    pub fn delete(&self, job: &Job) -> Result<(), ControllerError> {
        let mut infos = self.job_infos.lock();
        let key = job_key_of(job);
        match infos.get_mut(&key) {
            Some(ji) => {
                ji.job = None;
                debug!(job = %key, "job queued for cleanup");
                self.deleted_jobs.add(key);
                Ok(())
            }
            None => Err(ControllerError::not_found("job", &key)),
        }
    }

    pub fn add_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let key = job_key_of_pod(pod)?;
        let mut infos = self.job_infos.lock();
        infos
            .entry(key.clone())
            .or_insert_with(|| {
                let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
                JobInfo::new(namespace, name)
            })
            .add_pod(pod)
    }

    pub fn update_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        self.add_pod(pod)
    }

    pub fn delete_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let key = job_key_of_pod(pod)?;
        let mut infos = self.job_infos.lock();
        let Some(ji) = infos.get_mut(&key) else {
            return Ok(());
        };
        ji.delete_pod(pod)?;
        if ji.job.is_none() {
            self.deleted_jobs.add(key);
        }
        Ok(())
    }

    /// Whether the named task has at least `replicas` succeeded pods.
    pub fn task_completed(&self, job_key_str: &str, task_name: &str) -> bool {
        let infos = self.job_infos.lock();
        let Some(ji) = infos.get(job_key_str) else {
            return false;
        };
        let Some(task_pods) = ji.pods.get(task_name) else {
            return false;
        };
        let Some(job) = &ji.job else {
            return false;
        };

        let replicas = job
            .spec
            .tasks
            .iter()
            .find(|t| t.name == task_name)
            .map(|t| t.replicas)
            .unwrap_or(0);
        if replicas <= 0 {
            return false;
        }

        let completed = task_pods
            .values()
            .filter(|p| p.status.phase == PodPhase::Succeeded)
            .count() as i32;
        completed >= replicas
    }

    /// Whether the named task burned through its restart budget: the total
    /// restart count of its running and pending pods exceeds max retry
    /// (-1 means unlimited).
    pub fn task_failed(&self, job_key_str: &str, task_name: &str) -> bool {
        let infos = self.job_infos.lock();
        let Some(ji) = infos.get(job_key_str) else {
            return false;
        };
        let Some(task_pods) = ji.pods.get(task_name) else {
            return false;
        };
        let Some(job) = &ji.job else {
            return false;
        };

        let Some(task) = job.spec.tasks.iter().find(|t| t.name == task_name) else {
            return false;
        };
        if task.replicas == 0 || task.max_retry == -1 {
            return false;
        }
        let max_retry = if task.max_retry == 0 {
            DEFAULT_MAX_RETRY
        } else {
            task.max_retry
        };

        let mut retried = 0;
        for pod in task_pods.values() {
            if matches!(pod.status.phase, PodPhase::Running | PodPhase::Pending) {
                for status in &pod.status.init_container_statuses {
                    retried += status.restart_count;
                }
                for status in &pod.status.container_statuses {
                    retried += status.restart_count;
                }
            }
        }
        retried > max_retry
    }

    fn process_cleanup(&self, key: String) {
        let mut infos = self.job_infos.lock();
        let terminated = infos.get(&key).map(job_terminated).unwrap_or(true);
        if terminated {
            self.deleted_jobs.forget(&key);
            infos.remove(&key);
            debug!(job = %key, "job deleted from cache");
        } else {
            // Pods are still draining; come back later.
            RateLimitingQueue::add_rate_limited(&self.deleted_jobs, key);
        }
    }

    /// Service deleted-job cleanup until stopped.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                item = self.deleted_jobs.get() => {
                    match item {
                        Some(key) => {
                            self.process_cleanup(key.clone());
                            self.deleted_jobs.done(&key);
                        }
                        None => return,
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        self.deleted_jobs.shut_down();
                        return;
                    }
                }
            }
        }
    }
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a `<namespace>/<job-name>` key from a request.
pub fn job_key_by_request(req: &crate::apis::Request) -> String {
    job_key(&req.namespace, &req.job_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::{annotations, ContainerStatus, JobSpec, ObjectMeta, PodStatus, TaskSpec};

    fn job(namespace: &str, name: &str, task: &str, replicas: i32, max_retry: i32) -> Job {
        Job {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: JobSpec {
                tasks: vec![TaskSpec {
                    name: task.to_string(),
                    replicas,
                    max_retry,
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn pod(namespace: &str, name: &str, job_name: &str, task: &str, phase: PodPhase) -> Pod {
        let mut metadata = ObjectMeta::namespaced(namespace, name);
        metadata
            .annotations
            .insert(annotations::JOB_NAME_KEY.to_string(), job_name.to_string());
        metadata
            .annotations
            .insert(annotations::TASK_SPEC_KEY.to_string(), task.to_string());
        Pod {
            metadata,
            spec: Default::default(),
            status: PodStatus {
                phase,
                ..Default::default()
            },
        }
    }

    #[test]
    fn task_completed_requires_all_replicas() {
        let cache = JobCache::new();
        cache.add(&job("ns", "j1", "workers", 2, 0)).unwrap();
        cache
            .add_pod(&pod("ns", "p0", "j1", "workers", PodPhase::Succeeded))
            .unwrap();
        assert!(!cache.task_completed("ns/j1", "workers"));

        cache
            .add_pod(&pod("ns", "p1", "j1", "workers", PodPhase::Succeeded))
            .unwrap();
        assert!(cache.task_completed("ns/j1", "workers"));
    }

    #[test]
    fn task_failed_counts_restarts_of_live_pods() {
        let cache = JobCache::new();
        cache.add(&job("ns", "j1", "workers", 1, 2)).unwrap();

        let mut p = pod("ns", "p0", "j1", "workers", PodPhase::Running);
        p.status.container_statuses = vec![ContainerStatus {
            name: "main".to_string(),
            restart_count: 3,
        }];
        cache.add_pod(&p).unwrap();

        assert!(cache.task_failed("ns/j1", "workers"));
        // Unlimited retry never fails.
        let cache = JobCache::new();
        cache.add(&job("ns", "j1", "workers", 1, -1)).unwrap();
        cache.add_pod(&p).unwrap();
        assert!(!cache.task_failed("ns/j1", "workers"));
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let cache = JobCache::new();
        let j = job("ns", "j1", "t", 1, 0);
        cache.add(&j).unwrap();
        assert!(cache.add(&j).is_err());
    }
}
