//! Recovery plans for failed tasks.
//!
//! A plan lists the task's failed segments with their [`FailureClass`], the
//! latest checkpoint, and an ordered list of suggested actions. The order is
//! the priority a UI should present them in.

use anyhow::Result;
use serde::Serialize;

use super::classify::{classify_error, FailureClass};
use crate::db::{Db, RecoverySnapshot, SegmentId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    RetryFailedSegments,
    WaitAndRetry,
    FixConfig,
    CheckPermissions,
    ResumeFromCheckpoint,
}

impl RecoveryActionKind {
    pub fn label(self) -> &'static str {
        match self {
            RecoveryActionKind::RetryFailedSegments => "Retry failed segments",
            RecoveryActionKind::WaitAndRetry => "Wait and retry",
            RecoveryActionKind::FixConfig => "Fix configuration",
            RecoveryActionKind::CheckPermissions => "Check permissions",
            RecoveryActionKind::ResumeFromCheckpoint => "Resume from checkpoint",
        }
    }

    pub fn rationale(self) -> &'static str {
        match self {
            RecoveryActionKind::RetryFailedSegments => {
                "Some failures look transient; re-running only the failed segments keeps finished work."
            }
            RecoveryActionKind::WaitAndRetry => {
                "Rate limits and network errors often clear after a short pause."
            }
            RecoveryActionKind::FixConfig => {
                "A setting was rejected; change the voice, model or value range before retrying."
            }
            RecoveryActionKind::CheckPermissions => {
                "The provider refused access; check API keys and file permissions."
            }
            RecoveryActionKind::ResumeFromCheckpoint => {
                "A checkpoint exists; resuming skips segments that already succeeded."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub label: String,
    pub rationale: String,
}

impl From<RecoveryActionKind> for RecoveryAction {
    fn from(kind: RecoveryActionKind) -> Self {
        Self {
            kind,
            label: kind.label().to_string(),
            rationale: kind.rationale().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSegment {
    pub segment_id: SegmentId,
    pub stage_name: String,
    pub segment_index: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub class: FailureClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPlan {
    pub task_id: TaskId,
    pub from_stage: Option<String>,
    pub failed_segments: Vec<FailedSegment>,
    pub checkpoint: Option<RecoverySnapshot>,
    pub actions: Vec<RecoveryAction>,
}

impl RecoveryPlan {
    /// Failed segments worth handing to `Pipeline::retry_segments`.
    pub fn retryable_segment_ids(&self) -> Vec<SegmentId> {
        self.failed_segments
            .iter()
            .filter(|s| s.class == FailureClass::Retryable)
            .map(|s| s.segment_id)
            .collect()
    }

    pub fn action_kinds(&self) -> Vec<RecoveryActionKind> {
        self.actions.iter().map(|a| a.kind).collect()
    }
}

/// Ordered actions for the distinct failure classes present.
pub fn build_actions(classes: &[FailureClass], has_checkpoint: bool) -> Vec<RecoveryAction> {
    let mut kinds = Vec::new();
    if classes.contains(&FailureClass::Retryable) {
        kinds.push(RecoveryActionKind::RetryFailedSegments);
        kinds.push(RecoveryActionKind::WaitAndRetry);
    }
    if classes.contains(&FailureClass::ConfigInvalid) {
        kinds.push(RecoveryActionKind::FixConfig);
    }
    if classes.contains(&FailureClass::NonRetryable) {
        kinds.push(RecoveryActionKind::CheckPermissions);
    }
    if has_checkpoint {
        kinds.push(RecoveryActionKind::ResumeFromCheckpoint);
    }
    kinds.into_iter().map(RecoveryAction::from).collect()
}

#[derive(Clone)]
pub struct RecoveryPlanner {
    db: Db,
}

impl RecoveryPlanner {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_plan(&self, task_id: TaskId) -> Result<RecoveryPlan> {
        let segments = self.db.list_failed_segments(task_id).await?;
        let checkpoint = self.db.latest_snapshot(task_id).await?;

        let failed_segments: Vec<FailedSegment> = segments
            .into_iter()
            .map(|s| {
                let class = classify_error(
                    s.error_code.as_deref().unwrap_or(""),
                    s.error_message.as_deref().unwrap_or(""),
                );
                FailedSegment {
                    segment_id: s.id,
                    stage_name: s.stage_name,
                    segment_index: s.segment_index,
                    error_code: s.error_code,
                    error_message: s.error_message,
                    class,
                }
            })
            .collect();

        let from_stage = checkpoint
            .as_ref()
            .map(|c| c.stage_name.clone())
            .or_else(|| failed_segments.first().map(|s| s.stage_name.clone()));

        let classes: Vec<FailureClass> = failed_segments.iter().map(|s| s.class).collect();
        let actions = build_actions(&classes, checkpoint.is_some());

        tracing::debug!(
            task_id,
            failed = failed_segments.len(),
            has_checkpoint = checkpoint.is_some(),
            actions = actions.len(),
            "built recovery plan"
        );

        Ok(RecoveryPlan {
            task_id,
            from_stage,
            failed_segments,
            checkpoint,
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::db::SegmentStatus;
    use super::RecoveryActionKind::*;

    fn kinds(actions: &[RecoveryAction]) -> Vec<RecoveryActionKind> {
        actions.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn actions_follow_fixed_order() {
        let all = [
            FailureClass::NonRetryable,
            FailureClass::Retryable,
            FailureClass::ConfigInvalid,
        ];
        assert_eq!(
            kinds(&build_actions(&all, true)),
            vec![
                RetryFailedSegments,
                WaitAndRetry,
                FixConfig,
                CheckPermissions,
                ResumeFromCheckpoint
            ]
        );
    }

    #[test]
    fn duplicates_do_not_repeat_actions() {
        let classes = [FailureClass::Retryable, FailureClass::Retryable];
        assert_eq!(
            kinds(&build_actions(&classes, false)),
            vec![RetryFailedSegments, WaitAndRetry]
        );
    }

    #[test]
    fn checkpoint_only_and_empty() {
        assert_eq!(kinds(&build_actions(&[], true)), vec![ResumeFromCheckpoint]);
        assert!(build_actions(&[], false).is_empty());
    }

    #[test]
    fn actions_carry_label_and_rationale() {
        let actions = build_actions(&[FailureClass::ConfigInvalid], false);
        assert_eq!(actions[0].label, "Fix configuration");
        assert!(!actions[0].rationale.is_empty());
    }

    #[tokio::test]
    async fn plan_with_checkpoint_and_no_failures() {
        let db = Db::open_in_memory().await.unwrap();
        let seg = db
            .upsert_segment(3, "translate", 0, SegmentStatus::Success, None, None)
            .await
            .unwrap();
        CheckpointStore::new(db.clone())
            .save_segment_checkpoint(3, "translate", seg, serde_json::Value::Null)
            .await
            .unwrap();

        let plan = RecoveryPlanner::new(db).create_plan(3).await.unwrap();
        assert_eq!(plan.action_kinds(), vec![ResumeFromCheckpoint]);
        assert_eq!(plan.from_stage.as_deref(), Some("translate"));
        assert!(plan.failed_segments.is_empty());
    }

    #[tokio::test]
    async fn plan_classifies_failed_segments() {
        let db = Db::open_in_memory().await.unwrap();
        let rate = db
            .upsert_segment(4, "tts", 0, SegmentStatus::Failed, Some("429"), Some("Too Many Requests"))
            .await
            .unwrap();
        db.upsert_segment(4, "tts", 1, SegmentStatus::Failed, Some("E_AUTH"), Some("403 Forbidden"))
            .await
            .unwrap();
        db.upsert_segment(4, "tts", 2, SegmentStatus::Success, None, None)
            .await
            .unwrap();

        let plan = RecoveryPlanner::new(db).create_plan(4).await.unwrap();
        assert_eq!(plan.from_stage.as_deref(), Some("tts"));
        assert_eq!(plan.failed_segments.len(), 2);
        assert_eq!(plan.retryable_segment_ids(), vec![rate]);
        assert_eq!(
            plan.action_kinds(),
            vec![RetryFailedSegments, WaitAndRetry, CheckPermissions]
        );
        assert!(plan.checkpoint.is_none());
    }

    #[tokio::test]
    async fn plan_for_unknown_task_is_empty() {
        let db = Db::open_in_memory().await.unwrap();
        let plan = RecoveryPlanner::new(db).create_plan(99).await.unwrap();
        assert!(plan.actions.is_empty());
        assert_eq!(plan.from_stage, None);
    }
}
