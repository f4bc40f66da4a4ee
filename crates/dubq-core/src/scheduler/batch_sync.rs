//! Keep batch items and batch aggregates in step with their tasks.
//!
//! Best-effort: a failing batch write is logged and never blocks the queue.

use super::QueueScheduler;
use crate::db::{BatchId, BatchItemCounts, BatchItemStatus, BatchStatus, TaskId};
use crate::events::{BatchCompleted, BatchProgress};

/// Batch status implied by its item counts.
///
/// `total` is the number of accepted items. A batch with nothing accepted is
/// failed; one that has not started any item stays `Created`.
pub fn next_batch_status(current: BatchStatus, total: i64, counts: &BatchItemCounts) -> BatchStatus {
    if total <= 0 {
        return BatchStatus::Failed;
    }
    let settled = counts.completed + counts.failed;
    if settled >= total {
        if counts.failed == 0 {
            BatchStatus::Completed
        } else if counts.completed == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    } else if current == BatchStatus::Created && counts.running == 0 && settled == 0 {
        BatchStatus::Created
    } else {
        BatchStatus::Running
    }
}

impl QueueScheduler {
    pub(super) async fn sync_batch_item(
        &self,
        task_id: TaskId,
        batch_id: Option<BatchId>,
        status: BatchItemStatus,
        reason: Option<&str>,
    ) {
        let Some(batch_id) = batch_id else {
            return;
        };
        if let Err(e) = self
            .store
            .db()
            .set_batch_item_status(task_id, status, reason)
            .await
        {
            tracing::warn!(task_id, batch_id, error = %e, "failed to update batch item");
            return;
        }
        if let Err(e) = self.refresh_batch(batch_id).await {
            tracing::warn!(batch_id, error = %e, "failed to refresh batch");
        }
    }

    async fn refresh_batch(&self, batch_id: BatchId) -> anyhow::Result<()> {
        // Serialized so the terminal transition is observed (and announced) once.
        let _guard = self.batch_lock.lock().await;
        let db = self.store.db();
        let Some(batch) = db.get_batch(batch_id).await? else {
            tracing::debug!(batch_id, "batch vanished before refresh");
            return Ok(());
        };
        let counts = db.batch_item_counts(batch_id).await?;
        let status = next_batch_status(batch.status, batch.accepted_count, &counts);
        if status != batch.status {
            db.set_batch_status(batch_id, status).await?;
            tracing::debug!(
                batch_id,
                from = batch.status.as_str(),
                to = status.as_str(),
                "batch status changed"
            );
        }

        self.events.emit_batch_progress(BatchProgress {
            batch_id,
            status,
            total: batch.accepted_count,
            queued: counts.queued,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            rejected: counts.rejected,
        });

        if status.is_terminal() && !batch.status.is_terminal() {
            tracing::info!(
                batch_id,
                status = status.as_str(),
                completed = counts.completed,
                failed = counts.failed,
                "batch finished"
            );
            self.events.emit_batch_completed(BatchCompleted {
                batch_id,
                total: batch.accepted_count,
                completed: counts.completed,
                failed: counts.failed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(queued: i64, running: i64, completed: i64, failed: i64) -> BatchItemCounts {
        BatchItemCounts {
            queued,
            running,
            completed,
            failed,
            rejected: 0,
        }
    }

    #[test]
    fn untouched_batch_stays_created() {
        assert_eq!(
            next_batch_status(BatchStatus::Created, 3, &counts(3, 0, 0, 0)),
            BatchStatus::Created
        );
        assert_eq!(
            next_batch_status(BatchStatus::Created, 3, &counts(2, 1, 0, 0)),
            BatchStatus::Running
        );
    }

    #[test]
    fn running_batch_does_not_fall_back_to_created() {
        assert_eq!(
            next_batch_status(BatchStatus::Running, 3, &counts(3, 0, 0, 0)),
            BatchStatus::Running
        );
    }

    #[test]
    fn settled_batch_outcomes() {
        assert_eq!(
            next_batch_status(BatchStatus::Running, 2, &counts(0, 0, 2, 0)),
            BatchStatus::Completed
        );
        assert_eq!(
            next_batch_status(BatchStatus::Running, 2, &counts(0, 0, 0, 2)),
            BatchStatus::Failed
        );
        assert_eq!(
            next_batch_status(BatchStatus::Running, 2, &counts(0, 0, 1, 1)),
            BatchStatus::Partial
        );
    }

    #[test]
    fn nothing_accepted_is_failed() {
        assert_eq!(
            next_batch_status(BatchStatus::Created, 0, &counts(0, 0, 0, 0)),
            BatchStatus::Failed
        );
    }
}
