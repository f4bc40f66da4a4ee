//! Stage segment rows. Written by the pipeline, read by checkpoints and recovery plans.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_millis, Db};
use super::types::{SegmentId, SegmentStatus, TaskId, TaskSegmentRecord};

fn segment_from_row(row: &SqliteRow) -> TaskSegmentRecord {
    let status: String = row.get("status");
    TaskSegmentRecord {
        id: row.get("id"),
        task_id: row.get("task_id"),
        stage_name: row.get("stage_name"),
        segment_index: row.get("segment_index"),
        status: SegmentStatus::from_str(&status),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Db {
    /// Insert or update the segment `(task_id, stage_name, segment_index)` and return its id.
    ///
    /// `running` stamps the start time; `success`/`failed` stamp the finish time.
    pub async fn upsert_segment(
        &self,
        task_id: TaskId,
        stage_name: &str,
        segment_index: i64,
        status: SegmentStatus,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<SegmentId> {
        let now = unix_millis();
        let started_at = (status == SegmentStatus::Running).then_some(now);
        let finished_at =
            matches!(status, SegmentStatus::Success | SegmentStatus::Failed).then_some(now);
        let row = sqlx::query(
            r#"
            INSERT INTO task_segments (task_id, stage_name, segment_index, status,
                                       error_code, error_message, started_at,
                                       finished_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (task_id, stage_name, segment_index) DO UPDATE SET
                status = excluded.status,
                error_code = excluded.error_code,
                error_message = excluded.error_message,
                started_at = COALESCE(excluded.started_at, task_segments.started_at),
                finished_at = excluded.finished_at,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(task_id)
        .bind(stage_name)
        .bind(segment_index)
        .bind(status.as_str())
        .bind(error_code)
        .bind(error_message)
        .bind(started_at)
        .bind(finished_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// Segments of one task, optionally restricted to a stage, by id.
    pub async fn list_segments(
        &self,
        task_id: TaskId,
        stage_name: Option<&str>,
    ) -> Result<Vec<TaskSegmentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, stage_name, segment_index, status, error_code,
                   error_message, started_at, finished_at, updated_at
            FROM task_segments
            WHERE task_id = ?1
              AND (?2 IS NULL OR stage_name = ?2)
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .bind(stage_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(segment_from_row).collect())
    }

    /// Segments of one task currently in `failed`, by id.
    pub async fn list_failed_segments(&self, task_id: TaskId) -> Result<Vec<TaskSegmentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, stage_name, segment_index, status, error_code,
                   error_message, started_at, finished_at, updated_at
            FROM task_segments
            WHERE task_id = ?1 AND status = 'failed'
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(segment_from_row).collect())
    }
}
