//! CLI command handlers, one file per command.

mod add;
mod batches;
mod plan;
mod remove;
mod reorder;
mod requeue;
mod run;
mod status;

pub use add::run_add;
pub use batches::run_batches;
pub use plan::run_plan;
pub use remove::run_remove;
pub use reorder::run_reorder;
pub use requeue::run_requeue;
pub use run::run_queue;
pub use status::run_status;

use dubq_core::config::DubqConfig;
use dubq_core::context::AppContext;
use dubq_core::db::Db;
use dubq_core::pipeline::ProcessPipeline;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Context for one-shot commands. The scheduler starts paused, so queue
/// edits made here never start tasks; `dubq run` does that.
pub(crate) fn offline_context(cfg: &DubqConfig, db: Db) -> AppContext {
    let (events_tx, _events_rx) = mpsc::channel(1);
    let command = cfg
        .pipeline_command()
        .map(<[String]>::to_vec)
        .unwrap_or_default();
    let pipeline = Arc::new(ProcessPipeline::new(db.clone(), command, events_tx));
    let mut options = cfg.scheduler_options();
    options.start_paused = true;
    AppContext::with_options(cfg.clone(), db, pipeline, options)
}
