//! Reconcile durable `running` records with what is actually executing.
//!
//! A record is live when a worker slot holds it or the pipeline reports it.
//! Live records the pool lost track of are adopted; the rest are demoted to
//! waiting. When demotions keep happening pass after pass, reconciliation
//! backs off exponentially.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use super::QueueScheduler;
use crate::db::{BatchItemStatus, QueueTaskRecord, TaskId};

#[derive(Debug, Clone)]
pub(super) struct ReconcileBackoff {
    base: Duration,
    max: Duration,
    streak: u32,
    next_allowed: Option<Instant>,
}

impl ReconcileBackoff {
    pub(super) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            streak: 0,
            next_allowed: None,
        }
    }

    pub(super) fn ready(&self, now: Instant) -> bool {
        self.next_allowed.map_or(true, |t| now >= t)
    }

    /// Record a pass that demoted `demoted` records.
    pub(super) fn record(&mut self, demoted: usize, now: Instant) {
        if demoted == 0 {
            self.streak = 0;
            self.next_allowed = None;
            return;
        }
        self.streak = self.streak.saturating_add(1);
        self.next_allowed = self.delay().map(|d| now + d);
    }

    /// No delay after the first demoting pass; base, 2×base, ... after that.
    fn delay(&self) -> Option<Duration> {
        if self.streak < 2 {
            return None;
        }
        let factor = 1u32 << (self.streak - 2).min(16);
        Some(self.base.saturating_mul(factor).min(self.max))
    }
}

impl QueueScheduler {
    /// Returns the number of records demoted to waiting.
    pub(super) async fn reconcile(&self) -> anyhow::Result<usize> {
        let demoted: Vec<QueueTaskRecord> = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if !state.reconcile.ready(now) {
                tracing::trace!("reconciliation backing off");
                return Ok(0);
            }

            let live: HashSet<TaskId> = self.pipeline.running_task_ids().into_iter().collect();
            let running = self.store.get_snapshot(state.paused).await?.running;
            let running_ids: HashSet<TaskId> = running.iter().map(|r| r.task_id).collect();

            for task_id in state.pool.running_task_ids() {
                if !running_ids.contains(&task_id) {
                    state.pool.release_by_task(task_id);
                    tracing::warn!(task_id, "released slot held by a task that is not running");
                }
            }

            let mut demote = Vec::new();
            for record in running {
                if state.pool.slot_of(record.task_id).is_some() {
                    continue;
                }
                if !live.contains(&record.task_id) {
                    demote.push(record);
                    continue;
                }
                match state.pool.acquire(record.task_id) {
                    Some(slot) => {
                        self.store.adopt_running(record.task_id, slot).await?;
                        tracing::info!(task_id = record.task_id, slot, "adopted running task");
                    }
                    None => {
                        tracing::warn!(
                            task_id = record.task_id,
                            "pipeline is running a task but every slot is taken"
                        );
                    }
                }
            }

            if !demote.is_empty() {
                let ids: Vec<TaskId> = demote.iter().map(|r| r.task_id).collect();
                self.store.requeue_tasks(&ids).await?;
            }
            state.reconcile.record(demote.len(), now);
            demote
        };

        if demoted.is_empty() {
            return Ok(0);
        }
        let ids: Vec<TaskId> = demoted.iter().map(|r| r.task_id).collect();
        tracing::warn!(count = ids.len(), ?ids, "demoted running tasks with no live execution");
        self.store.db().reset_tasks_to_queued(&ids).await?;
        for record in &demoted {
            self.sync_batch_item(record.task_id, record.batch_id, BatchItemStatus::Queued, None)
                .await;
        }
        self.emit_queue_updated().await;
        Ok(demoted.len())
    }
}
