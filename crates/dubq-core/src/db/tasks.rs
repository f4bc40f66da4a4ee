//! Task rows: insert, read, status transitions.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_millis, Db};
use super::types::{BatchId, TaskConfig, TaskId, TaskRecord, TaskStatus};

pub(crate) fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let status: String = row.get("status");
    let config_json: String = row.get("config_json");
    Ok(TaskRecord {
        id: row.get("id"),
        source_url: row.get("source_url"),
        status: TaskStatus::from_str(&status),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        config: serde_json::from_str(&config_json)?,
        batch_id: row.get("batch_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Db {
    /// Insert a new queued task. It is not enqueued; the scheduler does that.
    pub async fn insert_task(
        &self,
        source_url: &str,
        config: &TaskConfig,
        batch_id: Option<BatchId>,
    ) -> Result<TaskId> {
        let now = unix_millis();
        let config_json = serde_json::to_string(config)?;
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (source_url, status, error_code, error_message,
                               config_json, batch_id, created_at, updated_at)
            VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(source_url)
        .bind(TaskStatus::Queued.as_str())
        .bind(config_json)
        .bind(batch_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_url, status, error_code, error_message,
                   config_json, batch_id, created_at, updated_at
            FROM tasks
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// List all tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_url, status, error_code, error_message,
                   config_json, batch_id, created_at, updated_at
            FROM tasks
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Set a task's status and error fields. Returns false when the task does not exist.
    pub async fn set_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = unix_millis();
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?1,
                error_code = ?2,
                error_message = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Put tasks back to `queued` and clear their error fields. Unknown ids are skipped.
    pub async fn reset_tasks_to_queued(&self, ids: &[TaskId]) -> Result<u64> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for id in ids {
            affected += sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'queued',
                    error_code = NULL,
                    error_message = NULL,
                    updated_at = ?1
                WHERE id = ?2
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}
