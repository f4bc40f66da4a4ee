//! Dispatch loop: move waiting tasks into free worker slots and start them.

use std::sync::atomic::Ordering;

use super::terminal::TerminalOutcome;
use super::{QueueScheduler, E_QUEUE_START_REJECTED};
use crate::db::{BatchItemStatus, QueueTaskRecord, TaskId, TaskStatus};
use crate::pipeline::StartOutcome;

impl QueueScheduler {
    /// Run dispatch passes until no trigger is pending.
    ///
    /// Only one caller runs passes at a time; others set the request flag and
    /// return, and the running caller picks the request up before leaving.
    pub async fn dispatch(&self) {
        self.dispatch_requested.store(true, Ordering::SeqCst);
        loop {
            let Ok(gate) = self.dispatch_gate.try_lock() else {
                return;
            };
            while self.dispatch_requested.swap(false, Ordering::SeqCst) {
                if let Err(e) = self.dispatch_pass().await {
                    tracing::warn!(error = %e, "dispatch pass failed");
                }
            }
            drop(gate);
            // A trigger may have landed between the last swap and the drop.
            if !self.dispatch_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    async fn dispatch_pass(&self) -> anyhow::Result<()> {
        loop {
            let (record, slot) = {
                let mut state = self.state.lock().await;
                if state.paused || !state.pool.has_capacity() {
                    return Ok(());
                }
                let Some(record) = self.store.dequeue(1).await?.into_iter().next() else {
                    return Ok(());
                };
                let Some(slot) = state.pool.acquire(record.task_id) else {
                    self.store.requeue_tasks(&[record.task_id]).await?;
                    tracing::warn!(
                        task_id = record.task_id,
                        "no worker slot after dequeue; task stays waiting"
                    );
                    return Ok(());
                };
                if let Err(e) = self.store.mark_running(record.task_id, slot).await {
                    state.pool.release_by_task(record.task_id);
                    self.put_back(record.task_id).await;
                    return Err(e);
                }
                (record, slot)
            };

            let task_id = record.task_id;
            tracing::info!(task_id, slot, "dispatching task");
            self.sync_batch_item(task_id, record.batch_id, BatchItemStatus::Running, None)
                .await;
            self.emit_queue_updated().await;

            match self.pipeline.start(task_id).await {
                StartOutcome::Accepted => {
                    tracing::debug!(task_id, "pipeline accepted task");
                }
                StartOutcome::AlreadyRunning => {
                    tracing::debug!(task_id, "pipeline busy, retrying dispatch shortly");
                    self.revert_start(&record).await;
                    self.schedule_retry();
                    return Ok(());
                }
                StartOutcome::Rejected(reason) => {
                    tracing::warn!(task_id, %reason, "pipeline rejected task start");
                    if let Err(e) = self
                        .store
                        .db()
                        .set_task_status(
                            task_id,
                            TaskStatus::Failed,
                            Some(E_QUEUE_START_REJECTED),
                            Some(&reason),
                        )
                        .await
                    {
                        tracing::warn!(task_id, error = %e, "could not record start rejection");
                    }
                    let finished = self
                        .finish_task(
                            task_id,
                            TerminalOutcome::Failed {
                                code: Some(E_QUEUE_START_REJECTED.to_string()),
                            },
                        )
                        .await;
                    if let Err(e) = finished {
                        // The slot must not outlive a task that never started.
                        self.state.lock().await.pool.release_by_task(task_id);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Undo a dispatch the pipeline could not take yet.
    async fn revert_start(&self, record: &QueueTaskRecord) {
        {
            let mut state = self.state.lock().await;
            state.pool.release_by_task(record.task_id);
            self.put_back(record.task_id).await;
        }
        self.sync_batch_item(
            record.task_id,
            record.batch_id,
            BatchItemStatus::Queued,
            None,
        )
        .await;
        self.emit_queue_updated().await;
    }

    /// Best-effort return of a claimed row to the waiting partition. A row
    /// left running without a slot is demoted by the next reconcile pass.
    async fn put_back(&self, task_id: TaskId) {
        if let Err(e) = self.store.requeue_tasks(&[task_id]).await {
            tracing::warn!(task_id, error = %e, "could not return claimed task to waiting");
        }
    }

    /// Dispatch again after `start_retry_delay`. At most one retry is pending.
    fn schedule_retry(&self) {
        if self.retry_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let me = self.me.clone();
        let delay = self.options.start_retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = me.upgrade() {
                scheduler.retry_pending.store(false, Ordering::SeqCst);
                scheduler.dispatch().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, QueueStatus, TaskConfig};
    use crate::events::EventBus;
    use crate::pipeline::{Pipeline, ProcessPipeline};
    use crate::queue::QueueStore;
    use crate::scheduler::SchedulerOptions;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn failed_slot_write_returns_task_and_slot() {
        let db = Db::open_in_memory().await.unwrap();
        let id = db
            .insert_task("https://youtu.be/abc", &TaskConfig::default(), None)
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let pipeline = Arc::new(ProcessPipeline::new(
            db.clone(),
            vec!["sleep".to_string(), "30".to_string()],
            tx,
        ));
        let scheduler = QueueScheduler::new(
            QueueStore::new(db.clone()),
            pipeline.clone(),
            EventBus::new(),
            SchedulerOptions {
                start_paused: true,
                ..SchedulerOptions::default()
            },
        );
        scheduler.enqueue_task(id, None, 0).await.unwrap();

        sqlx::query(
            r#"
            CREATE TRIGGER refuse_slot BEFORE UPDATE OF worker_slot ON queue
            WHEN NEW.worker_slot IS NOT NULL
            BEGIN SELECT RAISE(ABORT, 'slot write refused'); END
            "#,
        )
        .execute(&db.pool)
        .await
        .unwrap();
        scheduler.state.lock().await.paused = false;

        assert!(scheduler.dispatch_pass().await.is_err());
        assert!(scheduler.running_task_ids().await.is_empty());
        let record = scheduler.store().get(id).await.unwrap().unwrap();
        assert_eq!(record.queue_status, QueueStatus::Waiting);
        assert_eq!(record.worker_slot, None);

        sqlx::query("DROP TRIGGER refuse_slot")
            .execute(&db.pool)
            .await
            .unwrap();
        scheduler.dispatch().await;
        let record = scheduler.store().get(id).await.unwrap().unwrap();
        assert_eq!(record.queue_status, QueueStatus::Running);
        assert_eq!(record.worker_slot, Some(0));
        assert_eq!(scheduler.running_task_ids().await, vec![id]);
        pipeline.cancel(id).await.unwrap();
    }
}
