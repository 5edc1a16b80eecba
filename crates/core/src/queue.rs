//! Queue: the scheduler-side view of a weighted resource share.

use crate::resource::Resource;
use gangway_apis as apis;

pub type QueueId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub uid: QueueId,
    pub name: String,
    pub weight: i32,
    pub queue: apis::Queue,
}

impl QueueInfo {
    pub fn new(queue: apis::Queue) -> Self {
        QueueInfo {
            uid: queue.name().to_string(),
            name: queue.name().to_string(),
            weight: queue.spec.weight,
            queue,
        }
    }

    /// Whether resources allocated to this queue may be reclaimed by other
    /// queues. Defaults to true when unset.
    pub fn reclaimable(&self) -> bool {
        self.queue.spec.reclaimable.unwrap_or(true)
    }

    /// Hard cap on the queue's consumption, if configured.
    pub fn capability(&self) -> Option<Resource> {
        self.queue
            .spec
            .capability
            .as_ref()
            .map(Resource::from_resource_list)
    }
}
