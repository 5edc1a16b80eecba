//! Controller-side request and job bookkeeping types.

use crate::error::ControllerError;
use gangway_apis::{annotations, Action, Job, Pod};
use std::collections::HashMap;

/// A reconciliation request, the unit of work on controller queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub namespace: String,
    pub job_name: String,
    pub queue_name: String,
    pub task_name: String,
    pub action: Option<Action>,
}

impl Request {
    pub fn for_job(namespace: &str, job_name: &str, action: Option<Action>) -> Self {
        Request {
            namespace: namespace.to_string(),
            job_name: job_name.to_string(),
            queue_name: String::new(),
            task_name: String::new(),
            action,
        }
    }

    pub fn for_queue(queue_name: &str, action: Action) -> Self {
        Request {
            namespace: String::new(),
            job_name: String::new(),
            queue_name: queue_name.to_string(),
            task_name: String::new(),
            action: Some(action),
        }
    }
}

pub fn job_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

pub fn job_key_of(job: &Job) -> String {
    job_key(job.namespace(), job.name())
}

/// The job key of a pod, derived from its job-name annotation.
pub fn job_key_of_pod(pod: &Pod) -> Result<String, ControllerError> {
    match pod.annotation(annotations::JOB_NAME_KEY) {
        Some(job_name) if !job_name.is_empty() => Ok(job_key(pod.namespace(), job_name)),
        _ => Err(ControllerError::Invalid(format!(
            "pod {}/{} carries no job name",
            pod.namespace(),
            pod.name()
        ))),
    }
}

/// The task-spec name a pod was stamped from.
pub fn task_name_of_pod(pod: &Pod) -> Result<String, ControllerError> {
    match pod.annotation(annotations::TASK_SPEC_KEY) {
        Some(task) if !task.is_empty() => Ok(task.to_string()),
        _ => Err(ControllerError::Invalid(format!(
            "pod {}/{} carries no task name",
            pod.namespace(),
            pod.name()
        ))),
    }
}

/// Controller-side view of one job: the stored object plus its pods,
/// indexed task-name → pod-name.
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub namespace: String,
    pub name: String,
    pub job: Option<Job>,
    pub pods: HashMap<String, HashMap<String, Pod>>,
}

impl JobInfo {
    pub fn new(namespace: &str, name: &str) -> Self {
        JobInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            job: None,
            pods: HashMap::new(),
        }
    }

    pub fn set_job(&mut self, job: Job) {
        self.namespace = job.namespace().to_string();
        self.name = job.name().to_string();
        self.job = Some(job);
    }

    pub fn add_pod(&mut self, pod: &Pod) -> Result<(), ControllerError> {
        let task_name = task_name_of_pod(pod)?;
        self.pods
            .entry(task_name)
            .or_default()
            .insert(pod.name().to_string(), pod.clone());
        Ok(())
    }

    pub fn update_pod(&mut self, pod: &Pod) -> Result<(), ControllerError> {
        self.add_pod(pod)
    }

    pub fn delete_pod(&mut self, pod: &Pod) -> Result<(), ControllerError> {
        let task_name = task_name_of_pod(pod)?;
        if let Some(pods) = self.pods.get_mut(&task_name) {
            pods.remove(pod.name());
            if pods.is_empty() {
                self.pods.remove(&task_name);
            }
        }
        Ok(())
    }

    /// Total pods tracked across all tasks.
    pub fn pod_count(&self) -> usize {
        self.pods.values().map(HashMap::len).sum()
    }
}
