//! Contract between the scheduler and the conversion pipeline that runs tasks.
//!
//! The scheduler only decides *when* a task starts; the pipeline owns task
//! execution, segment rows and checkpoints, and reports back through a
//! stream of [`PipelineEvent`]s.

mod process;

pub use process::{ProcessPipeline, E_TASK_CANCELED};

use async_trait::async_trait;

use crate::db::{SegmentId, TaskId, TaskStatus};

/// Answer of the pipeline to a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    /// The engine is busy with this (or another) run; try again shortly.
    AlreadyRunning,
    /// The engine refused with a reason. Not retried.
    Rejected(String),
}

impl StartOutcome {
    /// Build an outcome from a free-text refusal, recognising "already running".
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.to_ascii_lowercase().contains("already running") {
            StartOutcome::AlreadyRunning
        } else {
            StartOutcome::Rejected(reason)
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, StartOutcome::Accepted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEventKind {
    Status(TaskStatus),
    Progress { stage: String, percent: f64 },
    Completed,
    Failed {
        code: Option<String>,
        message: Option<String>,
    },
    Runtime { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub task_id: TaskId,
    pub kind: PipelineEventKind,
}

impl PipelineEvent {
    pub fn completed(task_id: TaskId) -> Self {
        Self {
            task_id,
            kind: PipelineEventKind::Completed,
        }
    }

    pub fn failed(task_id: TaskId, code: Option<&str>, message: Option<&str>) -> Self {
        Self {
            task_id,
            kind: PipelineEventKind::Failed {
                code: code.map(str::to_string),
                message: message.map(str::to_string),
            },
        }
    }

    pub fn status(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            kind: PipelineEventKind::Status(status),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("task {0} is not running")]
    NotRunning(TaskId),
    #[error("no checkpoint recorded for task {0}")]
    NoCheckpoint(TaskId),
    #[error("pipeline refused: {0}")]
    Refused(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Operations the scheduler and recovery code need from the pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn start(&self, task_id: TaskId) -> StartOutcome;

    async fn cancel(&self, task_id: TaskId) -> Result<(), PipelineError>;

    async fn retry(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError>;

    /// Re-run only the given segments of a failed task.
    async fn retry_segments(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<StartOutcome, PipelineError>;

    async fn resume_from_checkpoint(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError>;

    /// Task ids the engine is executing right now.
    fn running_task_ids(&self) -> Vec<TaskId>;

    /// Arrange for the next start of `task_id` to resume from its latest checkpoint.
    async fn prepare_resume_from_checkpoint(&self, task_id: TaskId) -> Result<(), PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_recognises_already_running() {
        assert_eq!(
            StartOutcome::rejected("Pipeline already running task 4"),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(
            StartOutcome::rejected("missing API key"),
            StartOutcome::Rejected("missing API key".to_string())
        );
    }
}
