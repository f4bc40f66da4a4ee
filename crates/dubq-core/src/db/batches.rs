//! Batch and batch-item rows.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_millis, Db};
use super::types::{
    BatchId, BatchItemCounts, BatchItemRecord, BatchItemStatus, BatchRecord, BatchStatus,
    InsertedBatch, NewBatch, TaskId, TaskStatus,
};

fn batch_from_row(row: &SqliteRow) -> BatchRecord {
    let status: String = row.get("status");
    BatchRecord {
        id: row.get("id"),
        name: row.get("name"),
        total_count: row.get("total_count"),
        accepted_count: row.get("accepted_count"),
        rejected_count: row.get("rejected_count"),
        status: BatchStatus::from_str(&status),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    }
}

fn item_from_row(row: &SqliteRow) -> BatchItemRecord {
    let status: String = row.get("status");
    BatchItemRecord {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        task_id: row.get("task_id"),
        url: row.get("url"),
        item_index: row.get("item_index"),
        status: BatchItemStatus::from_str(&status),
        reject_reason: row.get("reject_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Db {
    /// Insert a batch, one task per accepted URL, and one item per URL, in one transaction.
    ///
    /// The batch starts `created` when at least one URL was accepted, `failed` otherwise.
    pub async fn insert_batch(&self, batch: &NewBatch) -> Result<InsertedBatch> {
        let now = unix_millis();
        let accepted = batch.urls.iter().filter(|u| u.reject_reason.is_none()).count() as i64;
        let rejected = batch.urls.len() as i64 - accepted;
        let status = if accepted > 0 {
            BatchStatus::Created
        } else {
            BatchStatus::Failed
        };
        let completed_at = (accepted == 0).then_some(now);
        let config_json = serde_json::to_string(&batch.config)?;

        let mut tx = self.pool.begin().await?;
        let batch_id = sqlx::query(
            r#"
            INSERT INTO batches (name, total_count, accepted_count, rejected_count,
                                 status, created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
            "#,
        )
        .bind(&batch.name)
        .bind(batch.total_count)
        .bind(accepted)
        .bind(rejected)
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut task_ids = Vec::with_capacity(accepted as usize);
        for item in &batch.urls {
            let (task_id, item_status) = match &item.reject_reason {
                Some(_) => (None, BatchItemStatus::Rejected),
                None => {
                    let task_id = sqlx::query(
                        r#"
                        INSERT INTO tasks (source_url, status, error_code, error_message,
                                           config_json, batch_id, created_at, updated_at)
                        VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5, ?5)
                        "#,
                    )
                    .bind(&item.url)
                    .bind(TaskStatus::Queued.as_str())
                    .bind(&config_json)
                    .bind(batch_id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid();
                    task_ids.push(task_id);
                    (Some(task_id), BatchItemStatus::Queued)
                }
            };
            sqlx::query(
                r#"
                INSERT INTO batch_items (batch_id, task_id, url, item_index, status,
                                         reject_reason, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                "#,
            )
            .bind(batch_id)
            .bind(task_id)
            .bind(&item.url)
            .bind(item.index)
            .bind(item_status.as_str())
            .bind(&item.reject_reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(InsertedBatch { batch_id, task_ids })
    }

    pub async fn get_batch(&self, id: BatchId) -> Result<Option<BatchRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, total_count, accepted_count, rejected_count,
                   status, created_at, updated_at, completed_at
            FROM batches
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(batch_from_row))
    }

    /// List all batches, newest first.
    pub async fn list_batches(&self) -> Result<Vec<BatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, total_count, accepted_count, rejected_count,
                   status, created_at, updated_at, completed_at
            FROM batches
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(batch_from_row).collect())
    }

    /// Items of a batch in submission order.
    pub async fn list_batch_items(&self, batch_id: BatchId) -> Result<Vec<BatchItemRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, task_id, url, item_index, status,
                   reject_reason, created_at, updated_at
            FROM batch_items
            WHERE batch_id = ?1
            ORDER BY item_index ASC, id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    /// Set the status of the item linked to `task_id`. Returns rows affected
    /// (0 for tasks that are not part of a batch).
    pub async fn set_batch_item_status(
        &self,
        task_id: TaskId,
        status: BatchItemStatus,
        reason: Option<&str>,
    ) -> Result<u64> {
        let now = unix_millis();
        let r = sqlx::query(
            r#"
            UPDATE batch_items
            SET status = ?1,
                reject_reason = ?2,
                updated_at = ?3
            WHERE task_id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Reset the items of the given tasks to `queued`. Tasks without an item are skipped.
    pub async fn reset_batch_items(&self, task_ids: &[TaskId]) -> Result<u64> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for task_id in task_ids {
            affected += sqlx::query(
                r#"
                UPDATE batch_items
                SET status = 'queued',
                    reject_reason = NULL,
                    updated_at = ?1
                WHERE task_id = ?2
                "#,
            )
            .bind(now)
            .bind(task_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn batch_item_counts(&self, batch_id: BatchId) -> Result<BatchItemCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM batch_items
            WHERE batch_id = ?1
            GROUP BY status
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = BatchItemCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match BatchItemStatus::from_str(&status) {
                BatchItemStatus::Queued => counts.queued = n,
                BatchItemStatus::Running => counts.running = n,
                BatchItemStatus::Completed => counts.completed = n,
                BatchItemStatus::Failed => counts.failed = n,
                BatchItemStatus::Rejected => counts.rejected = n,
            }
        }
        Ok(counts)
    }

    /// Update a batch's status; `completed_at` is set for terminal statuses and cleared otherwise.
    pub async fn set_batch_status(&self, batch_id: BatchId, status: BatchStatus) -> Result<()> {
        let now = unix_millis();
        let completed_at = status.is_terminal().then_some(now);
        sqlx::query(
            r#"
            UPDATE batches
            SET status = ?1,
                completed_at = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(now)
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
