//! `dubq status` – show the queue.
//!
//! Reads the stored queue without reconciling, so it is safe to run next to
//! `dubq run`.

use anyhow::Result;
use dubq_core::db::Db;
use dubq_core::queue::QueueStore;
use std::collections::HashMap;

pub async fn run_status(db: &Db) -> Result<()> {
    let snapshot = QueueStore::new(db.clone()).get_snapshot(false).await?;
    let urls: HashMap<i64, String> = db
        .list_tasks()
        .await?
        .into_iter()
        .map(|t| (t.id, t.source_url))
        .collect();

    let records: Vec<_> = snapshot
        .running
        .iter()
        .chain(&snapshot.waiting)
        .chain(&snapshot.failed)
        .chain(&snapshot.completed)
        .collect();
    if records.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<6} {:<24} {}", "ID", "STATUS", "SLOT", "ERROR", "URL");
    for r in records {
        let slot = r
            .worker_slot
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<10} {:<6} {:<24} {}",
            r.task_id,
            r.queue_status.as_str(),
            slot,
            r.last_error_code.as_deref().unwrap_or("-"),
            urls.get(&r.task_id).map(String::as_str).unwrap_or("?")
        );
    }
    println!(
        "{} waiting, {} running, {} completed, {} failed",
        snapshot.waiting.len(),
        snapshot.running.len(),
        snapshot.completed.len(),
        snapshot.failed.len()
    );
    Ok(())
}
