//! Durable queue rows: one per task, ordered by `position` within the waiting partition.
//!
//! Positions are unique across the table. New rows take `max(position) + 1`;
//! reorders and priority inserts permute the positions already held by the
//! waiting rows, so requeued rows keep their place relative to everyone else.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::db::{unix_millis, Db};
use super::types::{BatchId, QueueCounts, QueueStatus, QueueTaskRecord, TaskId};

fn queue_from_row(row: &SqliteRow) -> QueueTaskRecord {
    let status: String = row.get("queue_status");
    let slot: Option<i64> = row.get("worker_slot");
    QueueTaskRecord {
        task_id: row.get("task_id"),
        batch_id: row.get("batch_id"),
        queue_status: QueueStatus::from_str(&status),
        priority: row.get("priority"),
        position: row.get("position"),
        worker_slot: slot.map(|s| s as usize),
        enqueued_at: row.get("enqueued_at"),
        started_at: row.get("started_at"),
        heartbeat_at: row.get("heartbeat_at"),
        finished_at: row.get("finished_at"),
        last_error_code: row.get("last_error_code"),
        updated_at: row.get("updated_at"),
    }
}

struct WaitingEntry {
    task_id: TaskId,
    priority: i64,
    position: i64,
}

async fn waiting_entries(conn: &mut SqliteConnection) -> Result<Vec<WaitingEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT task_id, priority, position
        FROM queue
        WHERE queue_status = 'waiting'
        ORDER BY position ASC, task_id ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(|row| WaitingEntry {
            task_id: row.get("task_id"),
            priority: row.get("priority"),
            position: row.get("position"),
        })
        .collect())
}

async fn next_position(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(position), -1) AS max_pos FROM queue")
        .fetch_one(&mut *conn)
        .await?;
    let max_pos: i64 = row.get("max_pos");
    Ok(max_pos + 1)
}

/// Give `order[i]` the i-th smallest of `positions`.
async fn assign_positions(
    conn: &mut SqliteConnection,
    order: &[TaskId],
    mut positions: Vec<i64>,
) -> Result<()> {
    positions.sort_unstable();
    for (task_id, position) in order.iter().zip(positions) {
        sqlx::query("UPDATE queue SET position = ?1 WHERE task_id = ?2")
            .bind(position)
            .bind(task_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn fetch_record(conn: &mut SqliteConnection, task_id: TaskId) -> Result<Option<QueueTaskRecord>> {
    let row = sqlx::query(
        r#"
        SELECT task_id, batch_id, queue_status, priority, position, worker_slot,
               enqueued_at, started_at, heartbeat_at, finished_at, last_error_code, updated_at
        FROM queue
        WHERE task_id = ?1
        "#,
    )
    .bind(task_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(queue_from_row))
}

impl Db {
    pub async fn get_queue_record(&self, task_id: TaskId) -> Result<Option<QueueTaskRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_record(&mut conn, task_id).await
    }

    /// All queue rows in position order.
    pub async fn list_queue(&self) -> Result<Vec<QueueTaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, batch_id, queue_status, priority, position, worker_slot,
                   enqueued_at, started_at, heartbeat_at, finished_at, last_error_code, updated_at
            FROM queue
            ORDER BY position ASC, task_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_from_row).collect())
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query(
            r#"
            SELECT queue_status, COUNT(*) AS n
            FROM queue
            GROUP BY queue_status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.get("queue_status");
            let n: i64 = row.get("n");
            let n = n as usize;
            match QueueStatus::from_str(&status) {
                QueueStatus::Waiting => counts.waiting = n,
                QueueStatus::Running => counts.running = n,
                QueueStatus::Completed => counts.completed = n,
                QueueStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    /// Insert (or replace) the queue row for `task_id` as waiting.
    ///
    /// The row goes to the tail, unless some waiting row has a lower
    /// priority: then it is placed just before the first such row.
    pub async fn enqueue_waiting(
        &self,
        task_id: TaskId,
        batch_id: Option<BatchId>,
        priority: i64,
    ) -> Result<QueueTaskRecord> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM queue WHERE task_id = ?1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        let waiting = waiting_entries(&mut tx).await?;
        let position = next_position(&mut tx).await?;

        sqlx::query(
            r#"
            INSERT INTO queue (task_id, batch_id, queue_status, priority, position,
                               worker_slot, enqueued_at, started_at, heartbeat_at,
                               finished_at, last_error_code, updated_at)
            VALUES (?1, ?2, 'waiting', ?3, ?4, NULL, ?5, NULL, NULL, NULL, NULL, ?5)
            "#,
        )
        .bind(task_id)
        .bind(batch_id)
        .bind(priority)
        .bind(position)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(insert_at) = waiting.iter().position(|w| w.priority < priority) {
            let mut order: Vec<TaskId> = waiting.iter().map(|w| w.task_id).collect();
            order.insert(insert_at, task_id);
            let mut positions: Vec<i64> = waiting.iter().map(|w| w.position).collect();
            positions.push(position);
            assign_positions(&mut tx, &order, positions).await?;
        }

        let record = fetch_record(&mut tx, task_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("queue row for task {} vanished", task_id))?;
        tx.commit().await?;
        Ok(record)
    }

    /// Atomically move up to `limit` waiting rows (head first) to running.
    ///
    /// Claimed rows have no worker slot yet; `mark_queue_running` assigns it.
    pub async fn claim_waiting(&self, limit: usize) -> Result<Vec<QueueTaskRecord>> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT task_id, batch_id, queue_status, priority, position, worker_slot,
                   enqueued_at, started_at, heartbeat_at, finished_at, last_error_code, updated_at
            FROM queue
            WHERE queue_status = 'waiting'
            ORDER BY position ASC, task_id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = queue_from_row(row);
            sqlx::query(
                r#"
                UPDATE queue
                SET queue_status = 'running',
                    worker_slot = NULL,
                    started_at = ?1,
                    heartbeat_at = NULL,
                    finished_at = NULL,
                    updated_at = ?1
                WHERE task_id = ?2
                "#,
            )
            .bind(now)
            .bind(record.task_id)
            .execute(&mut *tx)
            .await?;
            record.queue_status = QueueStatus::Running;
            record.worker_slot = None;
            record.started_at = Some(now);
            record.heartbeat_at = None;
            record.finished_at = None;
            record.updated_at = now;
            claimed.push(record);
        }
        tx.commit().await?;
        Ok(claimed)
    }

    /// Record the worker slot of a claimed row and stamp start/heartbeat times.
    pub async fn mark_queue_running(&self, task_id: TaskId, slot: usize) -> Result<bool> {
        let now = unix_millis();
        let r = sqlx::query(
            r#"
            UPDATE queue
            SET queue_status = 'running',
                worker_slot = ?1,
                started_at = ?2,
                heartbeat_at = ?2,
                finished_at = NULL,
                updated_at = ?2
            WHERE task_id = ?3
            "#,
        )
        .bind(slot as i64)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Attach a worker slot to a running row without touching its start time.
    pub async fn set_queue_worker_slot(&self, task_id: TaskId, slot: usize) -> Result<bool> {
        let now = unix_millis();
        let r = sqlx::query(
            r#"
            UPDATE queue
            SET worker_slot = ?1,
                heartbeat_at = ?2,
                updated_at = ?2
            WHERE task_id = ?3 AND queue_status = 'running'
            "#,
        )
        .bind(slot as i64)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn touch_queue_heartbeat(&self, task_id: TaskId) -> Result<()> {
        let now = unix_millis();
        sqlx::query(
            r#"
            UPDATE queue
            SET heartbeat_at = ?1
            WHERE task_id = ?2 AND queue_status = 'running'
            "#,
        )
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a row to a terminal status (`completed` or `failed`) and free its slot.
    pub async fn mark_queue_finished(
        &self,
        task_id: TaskId,
        status: QueueStatus,
        error_code: Option<&str>,
    ) -> Result<bool> {
        let now = unix_millis();
        let r = sqlx::query(
            r#"
            UPDATE queue
            SET queue_status = ?1,
                worker_slot = NULL,
                finished_at = ?2,
                last_error_code = ?3,
                updated_at = ?2
            WHERE task_id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(error_code)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Put rows back to waiting at their existing position, clearing run state.
    pub async fn requeue_queue_records(&self, ids: &[TaskId]) -> Result<u64> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for id in ids {
            affected += sqlx::query(
                r#"
                UPDATE queue
                SET queue_status = 'waiting',
                    worker_slot = NULL,
                    started_at = NULL,
                    heartbeat_at = NULL,
                    finished_at = NULL,
                    last_error_code = NULL,
                    updated_at = ?1
                WHERE task_id = ?2
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

    /// Put a row back to waiting behind every other row.
    pub async fn move_queue_record_to_tail(&self, task_id: TaskId) -> Result<bool> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        let position = next_position(&mut tx).await?;
        let r = sqlx::query(
            r#"
            UPDATE queue
            SET queue_status = 'waiting',
                position = ?1,
                worker_slot = NULL,
                started_at = NULL,
                heartbeat_at = NULL,
                finished_at = NULL,
                last_error_code = NULL,
                updated_at = ?2
            WHERE task_id = ?3
            "#,
        )
        .bind(position)
        .bind(now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(r.rows_affected() > 0)
    }

    /// Delete the row only if it is waiting.
    pub async fn remove_waiting(&self, task_id: TaskId) -> Result<bool> {
        let r = sqlx::query("DELETE FROM queue WHERE task_id = ?1 AND queue_status = 'waiting'")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Move a waiting row to `to_index` (clamped) within the waiting partition.
    ///
    /// Returns `(from_index, to_index)`, or None if the task is not waiting.
    pub async fn reorder_waiting(
        &self,
        task_id: TaskId,
        to_index: usize,
    ) -> Result<Option<(usize, usize)>> {
        let mut tx = self.pool.begin().await?;
        let waiting = waiting_entries(&mut tx).await?;
        let Some(from_index) = waiting.iter().position(|w| w.task_id == task_id) else {
            tx.commit().await?;
            return Ok(None);
        };
        let to_index = to_index.min(waiting.len() - 1);
        if from_index != to_index {
            let mut order: Vec<TaskId> = waiting.iter().map(|w| w.task_id).collect();
            let moved = order.remove(from_index);
            order.insert(to_index, moved);
            let positions = waiting.iter().map(|w| w.position).collect();
            assign_positions(&mut tx, &order, positions).await?;
            sqlx::query("UPDATE queue SET updated_at = ?1 WHERE task_id = ?2")
                .bind(unix_millis())
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Some((from_index, to_index)))
    }

    /// Running rows started before `started_before` (Unix ms), or with no start time.
    pub async fn list_stale_running(&self, started_before: i64) -> Result<Vec<QueueTaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, batch_id, queue_status, priority, position, worker_slot,
                   enqueued_at, started_at, heartbeat_at, finished_at, last_error_code, updated_at
            FROM queue
            WHERE queue_status = 'running'
              AND (started_at IS NULL OR started_at < ?1)
            ORDER BY position ASC, task_id ASC
            "#,
        )
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_from_row).collect())
    }
}
