//! `dubq remove <id>` – drop a task that has not started.

use anyhow::Result;
use dubq_core::config::DubqConfig;
use dubq_core::db::Db;

use super::offline_context;

pub async fn run_remove(cfg: &DubqConfig, db: Db, id: i64) -> Result<()> {
    let ctx = offline_context(cfg, db);
    ctx.scheduler.remove_waiting_task(id).await?;
    println!("Removed task {id} from the queue");
    Ok(())
}
