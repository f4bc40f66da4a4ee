//! `dubq plan <id>` – print the recovery plan of a task as JSON.

use anyhow::Result;
use dubq_core::checkpoint::RecoveryPlanner;
use dubq_core::db::Db;

pub async fn run_plan(db: &Db, id: i64) -> Result<()> {
    if db.get_task(id).await?.is_none() {
        anyhow::bail!("task {id} not found");
    }
    let plan = RecoveryPlanner::new(db.clone()).create_plan(id).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
