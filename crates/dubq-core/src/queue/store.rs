//! Typed façade over the durable queue table.
//!
//! Every write goes through one async mutex so multi-statement updates
//! (priority inserts, reorders, claims) never interleave, even when the
//! scheduler re-enters itself from event handlers.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::db::{unix_millis, BatchId, Db, QueueCounts, QueueStatus, QueueTaskRecord, TaskId};

/// Queue rows grouped by status. Waiting rows are in dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub waiting: Vec<QueueTaskRecord>,
    pub running: Vec<QueueTaskRecord>,
    pub completed: Vec<QueueTaskRecord>,
    pub failed: Vec<QueueTaskRecord>,
    pub paused: bool,
    pub updated_at: i64,
}

impl QueueSnapshot {
    pub fn waiting_ids(&self) -> Vec<TaskId> {
        self.waiting.iter().map(|r| r.task_id).collect()
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        self.running.iter().map(|r| r.task_id).collect()
    }
}

/// Before/after indexes of a reordered waiting task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reordered {
    pub from_index: usize,
    pub to_index: usize,
}

pub struct QueueStore {
    db: Db,
    write_lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Option<QueueTaskRecord>> {
        self.db.get_queue_record(task_id).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.db.queue_counts().await
    }

    pub async fn enqueue(
        &self,
        task_id: TaskId,
        batch_id: Option<BatchId>,
        priority: i64,
    ) -> Result<QueueTaskRecord> {
        let _w = self.write_lock.lock().await;
        self.db.enqueue_waiting(task_id, batch_id, priority).await
    }

    /// Pop up to `limit` waiting records, head first. Each record is returned once.
    pub async fn dequeue(&self, limit: usize) -> Result<Vec<QueueTaskRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _w = self.write_lock.lock().await;
        self.db.claim_waiting(limit).await
    }

    pub async fn mark_running(&self, task_id: TaskId, slot: usize) -> Result<bool> {
        let _w = self.write_lock.lock().await;
        self.db.mark_queue_running(task_id, slot).await
    }

    /// Attach a slot to a record that is already running (reconciliation adoption).
    pub async fn adopt_running(&self, task_id: TaskId, slot: usize) -> Result<bool> {
        let _w = self.write_lock.lock().await;
        self.db.set_queue_worker_slot(task_id, slot).await
    }

    pub async fn heartbeat(&self, task_id: TaskId) -> Result<()> {
        let _w = self.write_lock.lock().await;
        self.db.touch_queue_heartbeat(task_id).await
    }

    /// `status` must be `Completed` or `Failed`.
    pub async fn mark_finished(
        &self,
        task_id: TaskId,
        status: QueueStatus,
        error_code: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(matches!(
            status,
            QueueStatus::Completed | QueueStatus::Failed
        ));
        let _w = self.write_lock.lock().await;
        self.db.mark_queue_finished(task_id, status, error_code).await
    }

    pub async fn reorder(&self, task_id: TaskId, to_index: usize) -> Result<Option<Reordered>> {
        let _w = self.write_lock.lock().await;
        Ok(self
            .db
            .reorder_waiting(task_id, to_index)
            .await?
            .map(|(from_index, to_index)| Reordered {
                from_index,
                to_index,
            }))
    }

    pub async fn remove_waiting_task(&self, task_id: TaskId) -> Result<bool> {
        let _w = self.write_lock.lock().await;
        self.db.remove_waiting(task_id).await
    }

    /// Running records whose start is older than `timeout`.
    pub async fn list_stale_running_tasks(
        &self,
        timeout: Duration,
    ) -> Result<Vec<QueueTaskRecord>> {
        self.list_stale_running_tasks_at(timeout, unix_millis()).await
    }

    pub async fn list_stale_running_tasks_at(
        &self,
        timeout: Duration,
        now_ms: i64,
    ) -> Result<Vec<QueueTaskRecord>> {
        let cutoff = now_ms.saturating_sub(timeout.as_millis() as i64);
        self.db.list_stale_running(cutoff).await
    }

    pub async fn requeue_tasks(&self, ids: &[TaskId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _w = self.write_lock.lock().await;
        self.db.requeue_queue_records(ids).await
    }

    pub async fn move_to_waiting_tail(&self, task_id: TaskId) -> Result<bool> {
        let _w = self.write_lock.lock().await;
        self.db.move_queue_record_to_tail(task_id).await
    }

    /// Snapshot of the durable queue; `paused` comes from the scheduler.
    pub async fn get_snapshot(&self, paused: bool) -> Result<QueueSnapshot> {
        let records = self.db.list_queue().await?;
        let mut snapshot = QueueSnapshot {
            waiting: Vec::new(),
            running: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            paused,
            updated_at: unix_millis(),
        };
        for record in records {
            match record.queue_status {
                QueueStatus::Waiting => snapshot.waiting.push(record),
                QueueStatus::Running => snapshot.running.push(record),
                QueueStatus::Completed => snapshot.completed.push(record),
                QueueStatus::Failed => snapshot.failed.push(record),
            }
        }
        Ok(snapshot)
    }
}
