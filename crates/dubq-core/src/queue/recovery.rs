//! Startup recovery: requeue tasks left `running` by an unclean shutdown.
//!
//! Runs once before the scheduler starts dispatching.

use anyhow::Result;
use std::time::Duration;

use super::store::QueueStore;
use crate::db::TaskId;
use crate::pipeline::Pipeline;

/// Default age after which a running record counts as orphaned.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub struct QueueRecovery<'a> {
    store: &'a QueueStore,
    stale_timeout: Duration,
}

impl<'a> QueueRecovery<'a> {
    pub fn new(store: &'a QueueStore, stale_timeout: Duration) -> Self {
        Self {
            store,
            stale_timeout,
        }
    }

    /// Requeue stale running records. Returns the recovered task ids.
    pub async fn recover(&self) -> Result<Vec<TaskId>> {
        self.recover_at(crate::db::unix_millis()).await
    }

    /// Same as [`recover`](Self::recover) with an explicit clock (Unix ms).
    pub async fn recover_at(&self, now_ms: i64) -> Result<Vec<TaskId>> {
        let stale = self
            .store
            .list_stale_running_tasks_at(self.stale_timeout, now_ms)
            .await?;
        if stale.is_empty() {
            tracing::debug!("queue recovery: no stale running tasks");
            return Ok(Vec::new());
        }
        let ids: Vec<TaskId> = stale.iter().map(|r| r.task_id).collect();

        self.store.requeue_tasks(&ids).await?;
        self.store.db().reset_tasks_to_queued(&ids).await?;
        if let Err(e) = self.store.db().reset_batch_items(&ids).await {
            tracing::warn!(error = %e, "queue recovery: could not reset batch items");
        }

        tracing::info!(count = ids.len(), ?ids, "queue recovery: requeued stale running tasks");
        Ok(ids)
    }
}

/// Ask the pipeline to prepare checkpoint resumes for recovered tasks.
///
/// Failures are logged and skipped; those tasks restart their stage from
/// scratch. Returns how many tasks were primed.
pub async fn prime_checkpoints(pipeline: &dyn Pipeline, task_ids: &[TaskId]) -> usize {
    let mut primed = 0;
    for &task_id in task_ids {
        match pipeline.prepare_resume_from_checkpoint(task_id).await {
            Ok(()) => primed += 1,
            Err(e) => {
                tracing::debug!(task_id, error = %e, "checkpoint priming skipped");
            }
        }
    }
    primed
}
