//! `dubq batches [id]` – list batches or show one batch's items.

use anyhow::Result;
use dubq_core::db::Db;

pub async fn run_batches(db: &Db, id: Option<i64>) -> Result<()> {
    let Some(id) = id else {
        let batches = db.list_batches().await?;
        if batches.is_empty() {
            println!("No batches in database.");
            return Ok(());
        }
        println!("{:<6} {:<10} {:<8} {:<8} {}", "ID", "STATUS", "ACCEPT", "REJECT", "NAME");
        for b in batches {
            println!(
                "{:<6} {:<10} {:<8} {:<8} {}",
                b.id,
                b.status.as_str(),
                b.accepted_count,
                b.rejected_count,
                b.name
            );
        }
        return Ok(());
    };

    let Some(batch) = db.get_batch(id).await? else {
        anyhow::bail!("batch {id} not found");
    };
    println!("Batch {} \"{}\": {}", batch.id, batch.name, batch.status.as_str());
    println!("{:<6} {:<10} {:<6} {}", "INDEX", "STATUS", "TASK", "URL");
    for item in db.list_batch_items(id).await? {
        let task = item
            .task_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let reason = item
            .reject_reason
            .map(|r| format!("  ({r})"))
            .unwrap_or_default();
        println!(
            "{:<6} {:<10} {:<6} {}{}",
            item.item_index,
            item.status.as_str(),
            task,
            item.url,
            reason
        );
    }
    Ok(())
}
