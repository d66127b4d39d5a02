//! Per-worker output queues.
//!
//! Frames decoded from a worker connection wait here until the command
//! executor consumes them. A worker's queue depth is the signal the dispatch
//! gate uses to decide that the previous command has been fully read; each
//! queue publishes its depth on a `watch` channel so waiters wake exactly
//! when it changes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::debug;

struct WorkerQueue {
    frames: VecDeque<String>,
    depth: watch::Sender<usize>,
}

impl WorkerQueue {
    fn new() -> Self {
        let (depth, _) = watch::channel(0);
        Self {
            frames: VecDeque::new(),
            depth,
        }
    }

    fn publish(&self) {
        self.depth.send_replace(self.frames.len());
    }
}

/// Thread-safe store of output queues keyed by worker id.
#[derive(Clone, Default)]
pub struct OutputQueues {
    queues: Arc<RwLock<HashMap<String, WorkerQueue>>>,
}

impl OutputQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded frames for a worker, preserving their order.
    pub async fn push(&self, worker: &str, frames: Vec<String>) {
        if frames.is_empty() {
            return;
        }
        let mut queues = self.queues.write().await;
        let queue = queues
            .entry(worker.to_string())
            .or_insert_with(WorkerQueue::new);
        queue.frames.extend(frames);
        queue.publish();
        debug!(worker, depth = queue.frames.len(), "Frames queued");
    }

    /// Number of frames waiting for a worker.
    pub async fn len(&self, worker: &str) -> usize {
        self.queues
            .read()
            .await
            .get(worker)
            .map_or(0, |queue| queue.frames.len())
    }

    /// Whether a worker has no queued frames.
    pub async fn is_empty(&self, worker: &str) -> bool {
        self.len(worker).await == 0
    }

    /// Remove and return the oldest frame, if any.
    pub async fn pop(&self, worker: &str) -> Option<String> {
        let mut queues = self.queues.write().await;
        let queue = queues.get_mut(worker)?;
        let frame = queue.frames.pop_front();
        queue.publish();
        frame
    }

    /// Remove and return every queued frame.
    pub async fn drain(&self, worker: &str) -> Vec<String> {
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(worker) else {
            return Vec::new();
        };
        let frames: Vec<String> = queue.frames.drain(..).collect();
        queue.publish();
        frames
    }

    /// Discard every queued frame.
    pub async fn clear(&self, worker: &str) -> usize {
        let discarded = self.drain(worker).await.len();
        if discarded > 0 {
            debug!(worker, discarded, "Queue cleared");
        }
        discarded
    }

    /// Wait for the next frame and remove it from the queue.
    pub async fn next_frame(&self, worker: &str) -> String {
        loop {
            let mut depth_rx = {
                let mut queues = self.queues.write().await;
                let queue = queues
                    .entry(worker.to_string())
                    .or_insert_with(WorkerQueue::new);
                if let Some(frame) = queue.frames.pop_front() {
                    queue.publish();
                    return frame;
                }
                queue.depth.subscribe()
            };
            // The sender lives in the map for the life of the store.
            let _ = depth_rx.wait_for(|depth| *depth > 0).await;
        }
    }

    /// Resolve once a worker's queue is empty.
    pub async fn wait_idle(&self, worker: &str) {
        let mut depth_rx = self.subscribe(worker).await;
        let _ = depth_rx.wait_for(|depth| *depth == 0).await;
    }

    /// Watch a worker's queue depth.
    pub async fn subscribe(&self, worker: &str) -> watch::Receiver<usize> {
        self.queues
            .write()
            .await
            .entry(worker.to_string())
            .or_insert_with(WorkerQueue::new)
            .depth
            .subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn owned(frames: &[&str]) -> Vec<String> {
        frames.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn push_and_drain_preserve_order() {
        let queues = OutputQueues::new();
        queues.push("w1", owned(&["a", "b"])).await;
        queues.push("w1", owned(&["c"])).await;

        assert_eq!(queues.len("w1").await, 3);
        assert_eq!(queues.drain("w1").await, vec!["a", "b", "c"]);
        assert!(queues.is_empty("w1").await);
    }

    #[tokio::test]
    async fn workers_are_isolated() {
        let queues = OutputQueues::new();
        queues.push("a", owned(&["from-a"])).await;
        queues.push("b", owned(&["from-b"])).await;

        assert_eq!(queues.drain("a").await, vec!["from-a"]);
        assert_eq!(queues.drain("b").await, vec!["from-b"]);
    }

    #[tokio::test]
    async fn unknown_worker_is_empty() {
        let queues = OutputQueues::new();
        assert_eq!(queues.len("nobody").await, 0);
        assert!(queues.pop("nobody").await.is_none());
        assert!(queues.drain("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn pop_takes_oldest_frame() {
        let queues = OutputQueues::new();
        queues.push("w", owned(&["first", "second"])).await;
        assert_eq!(queues.pop("w").await.as_deref(), Some("first"));
        assert_eq!(queues.len("w").await, 1);
    }

    #[tokio::test]
    async fn next_frame_waits_for_push() {
        let queues = OutputQueues::new();
        let reader = queues.clone();
        let handle = tokio::spawn(async move { reader.next_frame("w").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        queues.push("w", owned(&["late"])).await;
        let frame = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, "late");
        assert!(queues.is_empty("w").await);
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_drain() {
        let queues = OutputQueues::new();
        queues.push("w", owned(&["pending"])).await;

        let waiter = queues.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle("w").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        queues.drain("w").await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_on_empty_queue_returns_immediately() {
        let queues = OutputQueues::new();
        tokio::time::timeout(Duration::from_millis(100), queues.wait_idle("fresh"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clear_reports_discarded_count() {
        let queues = OutputQueues::new();
        queues.push("w", owned(&["x", "y"])).await;
        assert_eq!(queues.clear("w").await, 2);
        assert_eq!(queues.clear("w").await, 0);
    }
}
