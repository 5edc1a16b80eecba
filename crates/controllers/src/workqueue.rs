//! Rate-limited work queue with per-key exponential backoff.
//!
//! The queue deduplicates items (an item re-added while queued is folded
//! into the pending entry; re-added while processing it is requeued once
//! `done` is called), tracks failure counts per key for backoff, and shuts
//! down cooperatively: `get` returns `None` once shut down and drained.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(180);

struct Inner<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

pub struct RateLimitingQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_delays(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_delays(base_delay: Duration, max_delay: Duration) -> Self {
        RateLimitingQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Queue an item unless it is already pending.
    pub fn add(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                return;
            }
            if inner.dirty.contains(&item) {
                return;
            }
            inner.dirty.insert(item.clone());
            if !inner.processing.contains(&item) {
                inner.queue.push_back(item);
            }
        }
        self.notify.notify_one();
    }

    /// Re-queue after the item's exponential backoff delay.
    pub fn add_rate_limited(queue: &Arc<Self>, item: T) {
        let delay = {
            let mut inner = queue.inner.lock();
            let failures = inner.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            let exp = (*failures - 1).min(31);
            queue
                .base_delay
                .saturating_mul(2u32.saturating_pow(exp))
                .min(queue.max_delay)
        };
        let queue = Arc::clone(queue);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// How many times the item failed since it was last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Clear the item's failure history.
    pub fn forget(&self, item: &T) {
        self.inner.lock().failures.remove(item);
    }

    /// Wait for the next item. Returns `None` once the queue shuts down
    /// and drains.
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark the item processed. If it was re-added meanwhile, it goes back
    /// on the queue.
    pub fn done(&self, item: &T) {
        let requeued = {
            let mut inner = self.inner.lock();
            inner.processing.remove(item);
            if inner.dirty.contains(item) {
                inner.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop accepting work; waiters drain the backlog then observe `None`.
    pub fn shut_down(&self) {
        self.inner.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

impl<T> Default for RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_pending_items() {
        let q: RateLimitingQueue<&str> = RateLimitingQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn item_readded_while_processing_requeues_on_done() {
        let q: RateLimitingQueue<&str> = RateLimitingQueue::new();
        q.add("a");
        let item = q.get().await.unwrap();
        q.add("a");
        assert!(q.is_empty());
        q.done(&item);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn backoff_counts_failures_until_forgotten() {
        let q = Arc::new(RateLimitingQueue::with_delays(
            Duration::from_millis(1),
            Duration::from_millis(8),
        ));
        RateLimitingQueue::add_rate_limited(&q, "a");
        RateLimitingQueue::add_rate_limited(&q, "a");
        assert_eq!(q.num_requeues(&"a"), 2);
        q.forget(&"a");
        assert_eq!(q.num_requeues(&"a"), 0);

        // The delayed adds eventually land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_then_returns_none() {
        let q: RateLimitingQueue<&str> = RateLimitingQueue::new();
        q.add("a");
        q.shut_down();
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, None);
    }
}
