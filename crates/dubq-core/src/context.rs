//! Wiring of the long-lived services a front end needs.

use anyhow::Result;
use std::sync::Arc;

use crate::batch::{BatchCreator, BatchValidator};
use crate::checkpoint::{CheckpointStore, RecoveryPlanner};
use crate::config::DubqConfig;
use crate::db::{Db, TaskId};
use crate::events::EventBus;
use crate::pipeline::Pipeline;
use crate::queue::{prime_checkpoints, QueueRecovery, QueueStore};
use crate::scheduler::{QueueScheduler, SchedulerOptions};

pub struct AppContext {
    pub config: DubqConfig,
    pub db: Db,
    pub events: EventBus,
    pub pipeline: Arc<dyn Pipeline>,
    pub scheduler: Arc<QueueScheduler>,
    pub batches: BatchCreator,
    pub checkpoints: CheckpointStore,
    pub planner: RecoveryPlanner,
}

impl AppContext {
    pub fn new(config: DubqConfig, db: Db, pipeline: Arc<dyn Pipeline>) -> Self {
        let options = config.scheduler_options();
        Self::with_options(config, db, pipeline, options)
    }

    pub fn with_options(
        config: DubqConfig,
        db: Db,
        pipeline: Arc<dyn Pipeline>,
        options: SchedulerOptions,
    ) -> Self {
        let events = EventBus::new();
        let scheduler = QueueScheduler::new(
            QueueStore::new(db.clone()),
            Arc::clone(&pipeline),
            events.clone(),
            options,
        );
        let batches = BatchCreator::new(
            Arc::clone(&scheduler),
            BatchValidator::new(config.max_batch_urls),
        );
        Self {
            checkpoints: CheckpointStore::new(db.clone()),
            planner: RecoveryPlanner::new(db.clone()),
            config,
            db,
            events,
            pipeline,
            scheduler,
            batches,
        }
    }

    /// Startup recovery: requeue stale running records, then ask the
    /// pipeline to resume each of them from its latest checkpoint.
    ///
    /// Run this before the first dispatch.
    pub async fn recover(&self) -> Result<Vec<TaskId>> {
        let recovered = QueueRecovery::new(self.scheduler.store(), self.config.stale_timeout())
            .recover()
            .await?;
        if recovered.is_empty() {
            return Ok(recovered);
        }
        let primed = prime_checkpoints(self.pipeline.as_ref(), &recovered).await;
        tracing::info!(
            recovered = recovered.len(),
            primed,
            "startup recovery requeued stale tasks"
        );
        Ok(recovered)
    }
}
