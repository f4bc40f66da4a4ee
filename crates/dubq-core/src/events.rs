//! Queue and batch events, fanned out over one broadcast channel per kind.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::{BatchId, BatchStatus, TaskId};

const CHANNEL_CAPACITY: usize = 256;

/// Queue-wide counts, sent after every queue state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueUpdated {
    pub paused: bool,
    pub waiting_count: usize,
    pub running_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub updated_at: i64,
}

/// A waiting task was moved by `reorder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueTaskMoved {
    pub task_id: TaskId,
    pub from_index: usize,
    pub to_index: usize,
}

/// Item counts of a batch after one of its tasks changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub total: i64,
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub rejected: i64,
}

/// Every accepted task of a batch reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchCompleted {
    pub batch_id: BatchId,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Receiving end of one event kind. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) detaches it from the bus.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next event. Returns None once the bus is gone.
    /// Events dropped because this subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}

/// Typed fan-out for the four scheduler event kinds.
#[derive(Clone)]
pub struct EventBus {
    queue_updated: broadcast::Sender<QueueUpdated>,
    queue_task_moved: broadcast::Sender<QueueTaskMoved>,
    batch_progress: broadcast::Sender<BatchProgress>,
    batch_completed: broadcast::Sender<BatchCompleted>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            queue_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            queue_task_moved: broadcast::channel(CHANNEL_CAPACITY).0,
            batch_progress: broadcast::channel(CHANNEL_CAPACITY).0,
            batch_completed: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_queue_updated(&self) -> Subscription<QueueUpdated> {
        Subscription {
            rx: self.queue_updated.subscribe(),
        }
    }

    pub fn subscribe_queue_task_moved(&self) -> Subscription<QueueTaskMoved> {
        Subscription {
            rx: self.queue_task_moved.subscribe(),
        }
    }

    pub fn subscribe_batch_progress(&self) -> Subscription<BatchProgress> {
        Subscription {
            rx: self.batch_progress.subscribe(),
        }
    }

    pub fn subscribe_batch_completed(&self) -> Subscription<BatchCompleted> {
        Subscription {
            rx: self.batch_completed.subscribe(),
        }
    }

    // Send errors only mean nobody is subscribed.

    pub(crate) fn emit_queue_updated(&self, event: QueueUpdated) {
        let _ = self.queue_updated.send(event);
    }

    pub(crate) fn emit_queue_task_moved(&self, event: QueueTaskMoved) {
        let _ = self.queue_task_moved.send(event);
    }

    pub(crate) fn emit_batch_progress(&self, event: BatchProgress) {
        let _ = self.batch_progress.send(event);
    }

    pub(crate) fn emit_batch_completed(&self, event: BatchCompleted) {
        let _ = self.batch_completed.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(task_id: TaskId) -> QueueTaskMoved {
        QueueTaskMoved {
            task_id,
            from_index: 1,
            to_index: 0,
        }
    }

    #[tokio::test]
    async fn each_subscriber_sees_each_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_queue_task_moved();
        let mut b = bus.subscribe_queue_task_moved();
        bus.emit_queue_task_moved(moved(1));
        bus.emit_queue_task_moved(moved(2));

        assert_eq!(a.recv().await.unwrap().task_id, 1);
        assert_eq!(a.recv().await.unwrap().task_id, 2);
        assert_eq!(b.drain().len(), 2);
    }

    #[test]
    fn unsubscribed_receiver_does_not_block_emit() {
        let bus = EventBus::new();
        let sub = bus.subscribe_batch_completed();
        sub.unsubscribe();
        bus.emit_batch_completed(BatchCompleted {
            batch_id: 1,
            total: 1,
            completed: 1,
            failed: 0,
        });
        let mut late = bus.subscribe_batch_completed();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn kinds_are_independent() {
        let bus = EventBus::new();
        let mut progress = bus.subscribe_batch_progress();
        bus.emit_queue_task_moved(moved(3));
        assert!(progress.try_recv().is_none());
    }
}
