//! Row types and status enums stored in the dubq database.

use serde::{Deserialize, Serialize};

/// Task identifier.
pub type TaskId = i64;
/// Batch identifier.
pub type BatchId = i64;
/// Segment identifier (row id in `task_segments`).
pub type SegmentId = i64;

/// Position of a task in the durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Running,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Running => "running",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "waiting" => QueueStatus::Waiting,
            "running" => QueueStatus::Running,
            "completed" => QueueStatus::Completed,
            _ => QueueStatus::Failed,
        }
    }
}

/// Lifecycle status of a task as reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "canceled" => TaskStatus::Canceled,
            _ => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Created,
    Running,
    Completed,
    Failed,
    Partial,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "created" => BatchStatus::Created,
            "running" => BatchStatus::Running,
            "completed" => BatchStatus::Completed,
            "partial" => BatchStatus::Partial,
            _ => BatchStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Partial
        )
    }
}

/// Status of one URL inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Rejected,
}

impl BatchItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchItemStatus::Queued => "queued",
            BatchItemStatus::Running => "running",
            BatchItemStatus::Completed => "completed",
            BatchItemStatus::Failed => "failed",
            BatchItemStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => BatchItemStatus::Queued,
            "running" => BatchItemStatus::Running,
            "completed" => BatchItemStatus::Completed,
            "rejected" => BatchItemStatus::Rejected,
            _ => BatchItemStatus::Failed,
        }
    }
}

/// Status of a stage segment, written by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Running => "running",
            SegmentStatus::Success => "success",
            SegmentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => SegmentStatus::Pending,
            "running" => SegmentStatus::Running,
            "success" => SegmentStatus::Success,
            _ => SegmentStatus::Failed,
        }
    }
}

/// Per-task conversion settings, stored as JSON on the task row.
///
/// A batch shares one config; every task of the batch gets its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub target_language: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub speed: f64,
    pub pitch: f64,
    pub volume: f64,
    pub segmentation_strategy: String,
    pub segmentation_options: serde_json::Value,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            provider: "default".to_string(),
            transcription_model: None,
            translation_model: None,
            speech_model: None,
            voice: None,
            speed: 1.0,
            pitch: 0.0,
            volume: 1.0,
            segmentation_strategy: "punctuation".to_string(),
            segmentation_options: serde_json::Value::Object(Default::default()),
        }
    }
}

/// A conversion task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub source_url: String,
    pub status: TaskStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub config: TaskConfig,
    pub batch_id: Option<BatchId>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One row of the durable queue. At most one exists per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueTaskRecord {
    pub task_id: TaskId,
    pub batch_id: Option<BatchId>,
    pub queue_status: QueueStatus,
    pub priority: i64,
    /// Order key of the waiting partition (ascending).
    pub position: i64,
    pub worker_slot: Option<usize>,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub heartbeat_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub last_error_code: Option<String>,
    pub updated_at: i64,
}

/// Per-status record counts of the durable queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub name: String,
    pub total_count: i64,
    pub accepted_count: i64,
    pub rejected_count: i64,
    pub status: BatchStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemRecord {
    pub id: i64,
    pub batch_id: BatchId,
    /// None for rejected URLs (no task was created).
    pub task_id: Option<TaskId>,
    pub url: String,
    pub item_index: i64,
    pub status: BatchItemStatus,
    pub reject_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Item counts of one batch, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchItemCounts {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub rejected: i64,
}

/// One input URL of a batch about to be inserted.
#[derive(Debug, Clone)]
pub struct NewBatchUrl {
    /// Index of the URL in the submitted list.
    pub index: i64,
    pub url: String,
    /// Set for rejected URLs; accepted URLs get a task.
    pub reject_reason: Option<String>,
}

/// Everything needed to insert a batch with its tasks and items in one transaction.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub name: String,
    pub total_count: i64,
    pub urls: Vec<NewBatchUrl>,
    pub config: TaskConfig,
}

/// Ids produced by inserting a [`NewBatch`].
#[derive(Debug, Clone)]
pub struct InsertedBatch {
    pub batch_id: BatchId,
    /// Task ids in the order of the accepted URLs.
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSegmentRecord {
    pub id: SegmentId,
    pub task_id: TaskId,
    pub stage_name: String,
    pub segment_index: i64,
    pub status: SegmentStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

/// JSON document stored in each recovery snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub successful_segment_ids: Vec<SegmentId>,
    pub failed_segment_ids: Vec<SegmentId>,
    pub checkpoint_segment_id: SegmentId,
    #[serde(default)]
    pub config_snapshot: serde_json::Value,
}

/// Append-only checkpoint of one stage's segment progress.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverySnapshot {
    pub id: i64,
    pub task_id: TaskId,
    pub stage_name: String,
    pub checkpoint_key: String,
    pub snapshot: SnapshotDocument,
    pub created_at: i64,
}
