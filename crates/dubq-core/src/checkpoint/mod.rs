//! Segment checkpoints and recovery planning for failed tasks.

mod classify;
mod planner;
mod store;

pub use classify::{classify_error, FailureClass};
pub use planner::{
    build_actions, FailedSegment, RecoveryAction, RecoveryActionKind, RecoveryPlan,
    RecoveryPlanner,
};
pub use store::{checkpoint_key, CheckpointStore};
