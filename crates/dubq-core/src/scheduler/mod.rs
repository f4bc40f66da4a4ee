//! Queue scheduler.
//!
//! Owns the worker pool and drives the pipeline: tasks move
//! waiting → running → completed | failed, and completed/failed tasks can be
//! requeued. Dispatch runs after every enqueue, requeue, resume and terminal
//! event; concurrent triggers collapse into one pass. Repeated failures pause
//! the whole queue until an operator resumes it.

mod batch_sync;
mod dispatch;
mod reconcile;
mod terminal;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::db::{BatchId, BatchItemStatus, QueueStatus, QueueTaskRecord, TaskId, TaskStatus};
use crate::events::{EventBus, QueueTaskMoved, QueueUpdated};
use crate::pipeline::Pipeline;
use crate::queue::{QueueSnapshot, QueueStore, Reordered, WorkerPool};

use reconcile::ReconcileBackoff;

pub use batch_sync::next_batch_status;

/// Error code of tasks the pipeline refused to start.
pub const E_QUEUE_START_REJECTED: &str = "E_QUEUE_START_REJECTED";
/// Error code of tasks removed from the queue before they started.
pub const E_QUEUE_REMOVED: &str = "E_QUEUE_REMOVED";

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Requested worker slots; the pool clamps this to its own bounds.
    pub concurrency: usize,
    /// Consecutive failures that pause the queue. 0 disables auto-pause.
    pub auto_pause_threshold: u32,
    /// Delay before re-dispatching after the pipeline reported "already running".
    pub start_retry_delay: Duration,
    pub reconcile_base_backoff: Duration,
    pub reconcile_max_backoff: Duration,
    /// Start paused (no dispatch until `resume`).
    pub start_paused: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            auto_pause_threshold: 3,
            start_retry_delay: Duration::from_millis(200),
            reconcile_base_backoff: Duration::from_millis(500),
            reconcile_max_backoff: Duration::from_secs(30),
            start_paused: false,
        }
    }
}

/// Errors returned by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task {0} is not waiting")]
    NotWaiting(TaskId),
    #[error("task {0} is running")]
    Running(TaskId),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of [`QueueScheduler::requeue_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// The task had no queue record and was enqueued.
    Enqueued,
    /// The task went to the back of the waiting partition.
    MovedToTail,
    /// The task is running and was left alone.
    Rejected { reason: String },
}

struct SchedulerState {
    pool: WorkerPool,
    paused: bool,
    consecutive_failures: u32,
    reconcile: ReconcileBackoff,
}

pub struct QueueScheduler {
    me: Weak<QueueScheduler>,
    store: QueueStore,
    pipeline: Arc<dyn Pipeline>,
    events: EventBus,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    dispatch_gate: Mutex<()>,
    dispatch_requested: AtomicBool,
    retry_pending: AtomicBool,
    batch_lock: Mutex<()>,
}

impl QueueScheduler {
    pub fn new(
        store: QueueStore,
        pipeline: Arc<dyn Pipeline>,
        events: EventBus,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let state = SchedulerState {
            pool: WorkerPool::new(options.concurrency),
            paused: options.start_paused,
            consecutive_failures: 0,
            reconcile: ReconcileBackoff::new(
                options.reconcile_base_backoff,
                options.reconcile_max_backoff,
            ),
        };
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            pipeline,
            events,
            options,
            state: Mutex::new(state),
            dispatch_gate: Mutex::new(()),
            dispatch_requested: AtomicBool::new(false),
            retry_pending: AtomicBool::new(false),
            batch_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn capacity(&self) -> usize {
        self.state.lock().await.pool.capacity()
    }

    /// Tasks holding a worker slot, in slot order.
    pub async fn running_task_ids(&self) -> Vec<TaskId> {
        self.state.lock().await.pool.running_task_ids()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// Add a task to the waiting partition and dispatch.
    pub async fn enqueue_task(
        &self,
        task_id: TaskId,
        batch_id: Option<BatchId>,
        priority: i64,
    ) -> Result<QueueTaskRecord, QueueError> {
        let record = {
            let _state = self.state.lock().await;
            if let Some(existing) = self.store.get(task_id).await? {
                if existing.queue_status == QueueStatus::Running {
                    return Err(QueueError::Running(task_id));
                }
            }
            self.store.enqueue(task_id, batch_id, priority).await?
        };
        self.store
            .db()
            .set_task_status(task_id, TaskStatus::Queued, None, None)
            .await?;
        tracing::info!(task_id, ?batch_id, priority, "task enqueued");

        self.sync_batch_item(task_id, batch_id, BatchItemStatus::Queued, None)
            .await;
        self.emit_queue_updated().await;
        self.dispatch().await;
        Ok(record)
    }

    /// Put a task back in line: unknown tasks are enqueued, finished ones go
    /// to the waiting tail, running ones are left alone.
    pub async fn requeue_task(&self, task_id: TaskId) -> Result<RequeueOutcome, QueueError> {
        let record = {
            let _state = self.state.lock().await;
            match self.store.get(task_id).await? {
                None => None,
                Some(record) if record.queue_status == QueueStatus::Running => {
                    tracing::debug!(task_id, "requeue refused: task is running");
                    return Ok(RequeueOutcome::Rejected {
                        reason: format!("task {} is running", task_id),
                    });
                }
                Some(record) => {
                    self.store.move_to_waiting_tail(task_id).await?;
                    Some(record)
                }
            }
        };

        let Some(record) = record else {
            let batch_id = self
                .store
                .db()
                .get_task(task_id)
                .await?
                .and_then(|t| t.batch_id);
            self.enqueue_task(task_id, batch_id, 0).await?;
            return Ok(RequeueOutcome::Enqueued);
        };

        self.store
            .db()
            .set_task_status(task_id, TaskStatus::Queued, None, None)
            .await?;
        tracing::info!(task_id, "task requeued at tail");
        self.sync_batch_item(
            task_id,
            record.batch_id,
            BatchItemStatus::Queued,
            None,
        )
        .await;
        self.emit_queue_updated().await;
        self.dispatch().await;
        Ok(RequeueOutcome::MovedToTail)
    }

    /// Move a waiting task to `to_index` (clamped to the waiting partition).
    ///
    /// Returns None when the task is not waiting.
    pub async fn reorder(
        &self,
        task_id: TaskId,
        to_index: usize,
    ) -> Result<Option<Reordered>, QueueError> {
        let Some(moved) = self.store.reorder(task_id, to_index).await? else {
            return Ok(None);
        };
        tracing::debug!(task_id, from = moved.from_index, to = moved.to_index, "task reordered");
        self.events.emit_queue_task_moved(QueueTaskMoved {
            task_id,
            from_index: moved.from_index,
            to_index: moved.to_index,
        });
        self.emit_queue_updated().await;
        Ok(Some(moved))
    }

    /// Drop a task that has not started yet. The task is canceled with
    /// [`E_QUEUE_REMOVED`].
    pub async fn remove_waiting_task(&self, task_id: TaskId) -> Result<(), QueueError> {
        if !self.store.remove_waiting_task(task_id).await? {
            return Err(QueueError::NotWaiting(task_id));
        }
        let db = self.store.db();
        db.set_task_status(
            task_id,
            TaskStatus::Canceled,
            Some(E_QUEUE_REMOVED),
            Some("removed from queue before start"),
        )
        .await?;
        let batch_id = db.get_task(task_id).await?.and_then(|t| t.batch_id);
        tracing::info!(task_id, ?batch_id, "waiting task removed");

        self.sync_batch_item(
            task_id,
            batch_id,
            BatchItemStatus::Failed,
            Some(E_QUEUE_REMOVED),
        )
        .await;
        self.emit_queue_updated().await;
        Ok(())
    }

    pub async fn pause(&self) {
        {
            let mut state = self.state.lock().await;
            if state.paused {
                return;
            }
            state.paused = true;
        }
        tracing::info!("queue paused");
        self.emit_queue_updated().await;
    }

    /// Unpause, forget past failures, and dispatch.
    pub async fn resume(&self) {
        {
            let mut state = self.state.lock().await;
            state.paused = false;
            state.consecutive_failures = 0;
        }
        tracing::info!("queue resumed");
        self.emit_queue_updated().await;
        self.dispatch().await;
    }

    /// Reconcile durable state with live execution, give free slots to
    /// waiting tasks, then snapshot the queue.
    ///
    /// The dispatch pass also picks up rows another process enqueued.
    pub async fn get_snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let demoted = self.reconcile().await?;
        if demoted > 0 {
            tracing::debug!(demoted, "reconcile requeued tasks");
        }
        self.dispatch().await;
        let paused = self.is_paused().await;
        Ok(self.store.get_snapshot(paused).await?)
    }

    /// Nothing waiting and nothing running.
    pub async fn is_idle(&self) -> Result<bool, QueueError> {
        let counts = self.store.counts().await?;
        Ok(counts.waiting == 0 && counts.running == 0)
    }

    async fn emit_queue_updated(&self) {
        let paused = self.is_paused().await;
        match self.store.counts().await {
            Ok(counts) => self.events.emit_queue_updated(QueueUpdated {
                paused,
                waiting_count: counts.waiting,
                running_count: counts.running,
                completed_count: counts.completed,
                failed_count: counts.failed,
                updated_at: crate::db::unix_millis(),
            }),
            Err(e) => tracing::warn!(error = %e, "could not count queue for update event"),
        }
    }
}
