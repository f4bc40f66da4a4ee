//! `dubq reorder <id> <index>` – move a waiting task.

use anyhow::Result;
use dubq_core::config::DubqConfig;
use dubq_core::db::Db;

use super::offline_context;

pub async fn run_reorder(cfg: &DubqConfig, db: Db, id: i64, index: usize) -> Result<()> {
    let ctx = offline_context(cfg, db);
    match ctx.scheduler.reorder(id, index).await? {
        Some(moved) => println!(
            "Moved task {id} from position {} to {}",
            moved.from_index, moved.to_index
        ),
        None => anyhow::bail!("task {id} is not waiting"),
    }
    Ok(())
}
