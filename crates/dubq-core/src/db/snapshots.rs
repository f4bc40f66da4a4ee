//! Append-only recovery snapshot rows.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_millis, Db};
use super::types::{RecoverySnapshot, SnapshotDocument, TaskId};

fn snapshot_from_row(row: &SqliteRow) -> Result<RecoverySnapshot> {
    let json: String = row.get("snapshot_json");
    Ok(RecoverySnapshot {
        id: row.get("id"),
        task_id: row.get("task_id"),
        stage_name: row.get("stage_name"),
        checkpoint_key: row.get("checkpoint_key"),
        snapshot: serde_json::from_str(&json)?,
        created_at: row.get("created_at"),
    })
}

impl Db {
    /// Append a snapshot. Existing rows are never updated.
    pub async fn insert_snapshot(
        &self,
        task_id: TaskId,
        stage_name: &str,
        checkpoint_key: &str,
        snapshot: &SnapshotDocument,
    ) -> Result<RecoverySnapshot> {
        let now = unix_millis();
        let json = serde_json::to_string(snapshot)?;
        let id = sqlx::query(
            r#"
            INSERT INTO recovery_snapshots (task_id, stage_name, checkpoint_key,
                                            snapshot_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(task_id)
        .bind(stage_name)
        .bind(checkpoint_key)
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(RecoverySnapshot {
            id,
            task_id,
            stage_name: stage_name.to_string(),
            checkpoint_key: checkpoint_key.to_string(),
            snapshot: snapshot.clone(),
            created_at: now,
        })
    }

    /// Most recent snapshot of a task (insertion order breaks timestamp ties).
    pub async fn latest_snapshot(&self, task_id: TaskId) -> Result<Option<RecoverySnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, stage_name, checkpoint_key, snapshot_json, created_at
            FROM recovery_snapshots
            WHERE task_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// All snapshots of a task, oldest first.
    pub async fn list_snapshots(&self, task_id: TaskId) -> Result<Vec<RecoverySnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, stage_name, checkpoint_key, snapshot_json, created_at
            FROM recovery_snapshots
            WHERE task_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}
