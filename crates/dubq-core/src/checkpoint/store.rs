//! Append-only segment checkpoints per pipeline stage.

use anyhow::Result;

use crate::db::{Db, RecoverySnapshot, SegmentId, SegmentStatus, SnapshotDocument, TaskId};

/// Key of a snapshot: `<stage>:<checkpoint segment id>`.
pub fn checkpoint_key(stage_name: &str, checkpoint_segment_id: SegmentId) -> String {
    format!("{}:{}", stage_name, checkpoint_segment_id)
}

#[derive(Clone)]
pub struct CheckpointStore {
    db: Db,
}

impl CheckpointStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Record which segments of `(task_id, stage_name)` succeeded or failed so far.
    ///
    /// The lists are recomputed from the segment table on every call and
    /// stored as a new snapshot; older snapshots stay untouched.
    pub async fn save_segment_checkpoint(
        &self,
        task_id: TaskId,
        stage_name: &str,
        checkpoint_segment_id: SegmentId,
        config_snapshot: serde_json::Value,
    ) -> Result<RecoverySnapshot> {
        let segments = self.db.list_segments(task_id, Some(stage_name)).await?;
        let mut successful_segment_ids = Vec::new();
        let mut failed_segment_ids = Vec::new();
        for segment in &segments {
            match segment.status {
                SegmentStatus::Success => successful_segment_ids.push(segment.id),
                SegmentStatus::Failed => failed_segment_ids.push(segment.id),
                SegmentStatus::Pending | SegmentStatus::Running => {}
            }
        }
        let document = SnapshotDocument {
            successful_segment_ids,
            failed_segment_ids,
            checkpoint_segment_id,
            config_snapshot,
        };
        let key = checkpoint_key(stage_name, checkpoint_segment_id);
        let snapshot = self
            .db
            .insert_snapshot(task_id, stage_name, &key, &document)
            .await?;
        tracing::debug!(
            task_id,
            stage = stage_name,
            key = %key,
            ok = document.successful_segment_ids.len(),
            failed = document.failed_segment_ids.len(),
            "saved segment checkpoint"
        );
        Ok(snapshot)
    }

    pub async fn latest_snapshot(&self, task_id: TaskId) -> Result<Option<RecoverySnapshot>> {
        self.db.latest_snapshot(task_id).await
    }

    /// Every snapshot of the task, oldest first.
    pub async fn list_snapshots(&self, task_id: TaskId) -> Result<Vec<RecoverySnapshot>> {
        self.db.list_snapshots(task_id).await
    }
}
