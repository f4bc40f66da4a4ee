//! Create a batch from a list of URLs and hand its tasks to the queue.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::validate::{BatchInputError, BatchValidator, RejectedUrl, ValidationResult};
use crate::db::{
    unix_millis, BatchId, BatchItemRecord, BatchRecord, Db, NewBatch, NewBatchUrl, TaskConfig,
    TaskId,
};
use crate::scheduler::{QueueError, QueueScheduler};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Input(#[from] BatchInputError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCreated {
    pub batch_id: BatchId,
    /// Tasks created for accepted URLs, in input order.
    pub task_ids: Vec<TaskId>,
    pub accepted: usize,
    pub rejected: usize,
    pub rejected_items: Vec<RejectedUrl>,
}

pub struct BatchCreator {
    scheduler: Arc<QueueScheduler>,
    validator: BatchValidator,
}

fn default_batch_name(now_ms: i64) -> String {
    format!("batch-{}", now_ms / 1000)
}

/// Accepted and rejected URLs merged back into input order.
fn batch_urls(result: &ValidationResult) -> Vec<NewBatchUrl> {
    let mut urls: Vec<NewBatchUrl> = result
        .accepted
        .iter()
        .map(|a| NewBatchUrl {
            index: a.index as i64,
            url: a.url.clone(),
            reject_reason: None,
        })
        .chain(result.rejected.iter().map(|r| NewBatchUrl {
            index: r.index as i64,
            url: r.url.clone(),
            reject_reason: Some(r.reason.to_string()),
        }))
        .collect();
    urls.sort_by_key(|u| u.index);
    urls
}

impl BatchCreator {
    pub fn new(scheduler: Arc<QueueScheduler>, validator: BatchValidator) -> Self {
        Self {
            scheduler,
            validator,
        }
    }

    fn db(&self) -> &Db {
        self.scheduler.store().db()
    }

    /// Validate `input` (a JSON array of URLs), persist the batch, and
    /// enqueue one task per accepted URL with the shared config.
    pub async fn create_batch_from_value(
        &self,
        input: &Value,
        shared_config: &TaskConfig,
        name: Option<&str>,
    ) -> Result<BatchCreated, BatchError> {
        match input {
            Value::Array(entries) => self.create_batch(entries, shared_config, name).await,
            _ => Err(BatchInputError::NotAnArray.into()),
        }
    }

    pub async fn create_batch(
        &self,
        urls: &[Value],
        shared_config: &TaskConfig,
        name: Option<&str>,
    ) -> Result<BatchCreated, BatchError> {
        let result = self.validator.validate(urls)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_batch_name(unix_millis()));

        let inserted = self
            .db()
            .insert_batch(&NewBatch {
                name: name.clone(),
                total_count: result.total_count as i64,
                urls: batch_urls(&result),
                config: shared_config.clone(),
            })
            .await?;
        tracing::info!(
            batch_id = inserted.batch_id,
            %name,
            accepted = result.accepted.len(),
            rejected = result.rejected.len(),
            "batch created"
        );

        for task_id in &inserted.task_ids {
            self.scheduler
                .enqueue_task(*task_id, Some(inserted.batch_id), 0)
                .await?;
        }

        Ok(BatchCreated {
            batch_id: inserted.batch_id,
            task_ids: inserted.task_ids,
            accepted: result.accepted.len(),
            rejected: result.rejected.len(),
            rejected_items: result.rejected,
        })
    }

    pub async fn get_batch(&self, batch_id: BatchId) -> anyhow::Result<Option<BatchRecord>> {
        self.db().get_batch(batch_id).await
    }

    pub async fn list_batches(&self) -> anyhow::Result<Vec<BatchRecord>> {
        self.db().list_batches().await
    }

    pub async fn list_batch_items(&self, batch_id: BatchId) -> anyhow::Result<Vec<BatchItemRecord>> {
        self.db().list_batch_items(batch_id).await
    }
}
