//! `dubq requeue <id>` – put a task back in line.

use anyhow::Result;
use dubq_core::config::DubqConfig;
use dubq_core::db::Db;
use dubq_core::scheduler::RequeueOutcome;

use super::offline_context;

pub async fn run_requeue(cfg: &DubqConfig, db: Db, id: i64) -> Result<()> {
    let ctx = offline_context(cfg, db);
    match ctx.scheduler.requeue_task(id).await? {
        RequeueOutcome::Enqueued => println!("Queued task {id}"),
        RequeueOutcome::MovedToTail => println!("Moved task {id} to the end of the queue"),
        RequeueOutcome::Rejected { reason } => anyhow::bail!("cannot requeue task {id}: {reason}"),
    }
    Ok(())
}
