//! Terminal transitions driven by pipeline events.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{QueueError, QueueScheduler};
use crate::db::{BatchItemStatus, QueueStatus, TaskId, TaskStatus};
use crate::pipeline::{PipelineEvent, PipelineEventKind, E_TASK_CANCELED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TerminalOutcome {
    Completed,
    Failed { code: Option<String> },
    /// Operator cancel; recorded as failed but never counts toward auto-pause.
    Canceled,
}

impl QueueScheduler {
    /// Feed pipeline events into the scheduler until the sender side closes.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<PipelineEvent>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let task_id = event.task_id;
                match scheduler.apply_pipeline_event(event).await {
                    // Starting the next task may feed this same channel, so
                    // the listener never dispatches inline.
                    Ok(true) => {
                        let scheduler = Arc::clone(&scheduler);
                        tokio::spawn(async move { scheduler.dispatch().await });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(task_id, error = %e, "failed to apply pipeline event")
                    }
                }
            }
            tracing::debug!("pipeline event stream closed");
        })
    }

    /// Apply one pipeline event and dispatch if it freed a slot.
    pub async fn handle_pipeline_event(&self, event: PipelineEvent) -> Result<(), QueueError> {
        if self.apply_pipeline_event(event).await? {
            self.dispatch().await;
        }
        Ok(())
    }

    /// Returns true when the event finished a running task.
    async fn apply_pipeline_event(&self, event: PipelineEvent) -> Result<bool, QueueError> {
        let task_id = event.task_id;
        let outcome = match event.kind {
            PipelineEventKind::Completed | PipelineEventKind::Status(TaskStatus::Completed) => {
                TerminalOutcome::Completed
            }
            PipelineEventKind::Failed { code, .. } => TerminalOutcome::Failed { code },
            PipelineEventKind::Status(TaskStatus::Failed) => TerminalOutcome::Failed { code: None },
            PipelineEventKind::Status(TaskStatus::Canceled) => TerminalOutcome::Canceled,
            PipelineEventKind::Progress { stage, percent } => {
                tracing::trace!(task_id, %stage, percent, "progress");
                self.store.heartbeat(task_id).await?;
                return Ok(false);
            }
            PipelineEventKind::Status(status) => {
                tracing::debug!(task_id, status = status.as_str(), "pipeline status");
                return Ok(false);
            }
            PipelineEventKind::Runtime { message } => {
                tracing::debug!(task_id, %message, "pipeline output");
                return Ok(false);
            }
        };

        Ok(self.finish_task(task_id, outcome).await?)
    }

    /// Move a running task to its terminal queue status and free its slot.
    ///
    /// Returns false (and changes nothing) when the task is not running, so
    /// duplicate or late terminal events are harmless. Does not dispatch.
    pub(crate) async fn finish_task(
        &self,
        task_id: TaskId,
        outcome: TerminalOutcome,
    ) -> anyhow::Result<bool> {
        let (status, code) = match &outcome {
            TerminalOutcome::Completed => (QueueStatus::Completed, None),
            TerminalOutcome::Failed { code } => (QueueStatus::Failed, code.clone()),
            TerminalOutcome::Canceled => (QueueStatus::Failed, Some(E_TASK_CANCELED.to_string())),
        };

        let (batch_id, auto_paused, failures) = {
            let mut state = self.state.lock().await;
            let Some(record) = self.store.get(task_id).await? else {
                tracing::debug!(task_id, "terminal event for task with no queue record");
                return Ok(false);
            };
            if record.queue_status != QueueStatus::Running {
                tracing::debug!(
                    task_id,
                    status = record.queue_status.as_str(),
                    "ignoring terminal event for task that is not running"
                );
                return Ok(false);
            }

            state.pool.release_by_task(task_id);
            self.store
                .mark_finished(task_id, status, code.as_deref())
                .await?;

            let mut auto_paused = false;
            match outcome {
                TerminalOutcome::Completed => state.consecutive_failures = 0,
                TerminalOutcome::Failed { .. } => {
                    state.consecutive_failures += 1;
                    let threshold = self.options.auto_pause_threshold;
                    if threshold > 0 && !state.paused && state.consecutive_failures >= threshold {
                        state.paused = true;
                        auto_paused = true;
                    }
                }
                TerminalOutcome::Canceled => {}
            }
            (record.batch_id, auto_paused, state.consecutive_failures)
        };

        tracing::info!(
            task_id,
            status = status.as_str(),
            code = code.as_deref().unwrap_or(""),
            "task finished"
        );
        if auto_paused {
            tracing::warn!(failures, "queue auto-paused after consecutive failures");
        }

        let (item_status, reason) = match status {
            QueueStatus::Completed => (BatchItemStatus::Completed, None),
            _ => (BatchItemStatus::Failed, code.as_deref()),
        };
        self.sync_batch_item(task_id, batch_id, item_status, reason)
            .await;
        self.emit_queue_updated().await;
        Ok(true)
    }
}
