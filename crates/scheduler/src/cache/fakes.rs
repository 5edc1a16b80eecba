//! In-memory collaborator fakes for tests and local runs.

use super::{BatchBinder, Binder, CacheCollaborators, Evictor, PodVolumes, StatusUpdater, VolumeBinder};
use crate::error::SchedulerError;
use async_trait::async_trait;
use gangway_apis::{FakeRecorder, Pod, PodGroup};
use gangway_core::{JobInfo, TaskInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Records binds; every bind succeeds.
#[derive(Default)]
pub struct FakeBinder {
    binds: Mutex<HashMap<String, String>>,
    notify: Notify,
}

impl FakeBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `namespace/name` → node name of every bind seen so far.
    pub fn binds(&self) -> HashMap<String, String> {
        self.binds.lock().clone()
    }

    /// Wait until at least `n` binds landed or the timeout expires.
    pub async fn wait_for_binds(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.binds.lock().len() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.binds.lock().len() >= n;
            }
        }
    }
}

#[async_trait]
impl Binder for FakeBinder {
    async fn bind(&self, tasks: Vec<TaskInfo>) -> Vec<TaskInfo> {
        {
            let mut binds = self.binds.lock();
            for task in &tasks {
                binds.insert(
                    format!("{}/{}", task.namespace, task.name),
                    task.node_name().to_string(),
                );
            }
        }
        self.notify.notify_waiters();
        Vec::new()
    }
}

/// Records evictions; every eviction succeeds.
#[derive(Default)]
pub struct FakeEvictor {
    evicts: Mutex<Vec<String>>,
    notify: Notify,
}

impl FakeEvictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evicts(&self) -> Vec<String> {
        self.evicts.lock().clone()
    }

    pub async fn wait_for_evictions(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evicts.lock().len() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.evicts.lock().len() >= n;
            }
        }
    }
}

#[async_trait]
impl Evictor for FakeEvictor {
    async fn evict(&self, pod: &Pod, _reason: &str) -> Result<(), SchedulerError> {
        self.evicts.lock().push(pod.metadata.key());
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Accepts every status update verbatim.
#[derive(Default)]
pub struct FakeStatusUpdater;

#[async_trait]
impl StatusUpdater for FakeStatusUpdater {
    async fn update_pod_group(&self, pg: &PodGroup) -> Result<PodGroup, SchedulerError> {
        Ok(pg.clone())
    }
}

/// Volume scheduling that always succeeds.
#[derive(Default)]
pub struct FakeVolumeBinder;

impl VolumeBinder for FakeVolumeBinder {
    fn get_pod_volumes(&self, _task: &TaskInfo) -> Result<PodVolumes, SchedulerError> {
        Ok(PodVolumes)
    }

    fn allocate_volumes(
        &self,
        _task: &TaskInfo,
        _hostname: &str,
        _volumes: &PodVolumes,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn bind_volumes(&self, _task: &TaskInfo, _volumes: &PodVolumes) -> Result<(), SchedulerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBatchBinder;

#[async_trait]
impl BatchBinder for FakeBatchBinder {
    async fn bind(&self, _job: &JobInfo, _cluster: &str) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// A complete set of fake collaborators, handing back the fakes so tests
/// can observe them.
pub struct FakeCollaborators {
    pub binder: Arc<FakeBinder>,
    pub evictor: Arc<FakeEvictor>,
    pub recorder: Arc<FakeRecorder>,
}

impl FakeCollaborators {
    pub fn new() -> (CacheCollaborators, FakeCollaborators) {
        let binder = Arc::new(FakeBinder::new());
        let evictor = Arc::new(FakeEvictor::new());
        let recorder = Arc::new(FakeRecorder::new());
        (
            CacheCollaborators {
                binder: binder.clone(),
                evictor: evictor.clone(),
                status_updater: Arc::new(FakeStatusUpdater),
                volume_binder: Arc::new(FakeVolumeBinder),
                batch_binder: Arc::new(FakeBatchBinder),
                recorder: recorder.clone(),
            },
            FakeCollaborators {
                binder,
                evictor,
                recorder,
            },
        )
    }
}
