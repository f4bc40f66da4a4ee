//! `dubq run` – recover, then drive the scheduler until the queue drains.

use anyhow::Result;
use dubq_core::config::{config_path, DubqConfig};
use dubq_core::context::AppContext;
use dubq_core::db::Db;
use dubq_core::pipeline::ProcessPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const POLL_INTERVAL_MS: u64 = 500;
const EVENT_BUFFER: usize = 64;

pub async fn run_queue(cfg: &DubqConfig, db: Db, concurrency: Option<usize>) -> Result<()> {
    let Some(command) = cfg.pipeline_command() else {
        let path = config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "config.toml".to_string());
        anyhow::bail!("no pipeline command configured; set [pipeline] command in {path}");
    };

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let pipeline = Arc::new(ProcessPipeline::new(db.clone(), command.to_vec(), events_tx));
    let mut options = cfg.scheduler_options();
    if let Some(n) = concurrency {
        options.concurrency = n;
    }
    // Nothing may start before recovery has requeued and primed old tasks.
    options.start_paused = true;
    let ctx = AppContext::with_options(cfg.clone(), db, pipeline, options);

    let recovered = ctx.recover().await?;
    if !recovered.is_empty() {
        println!("Recovered {} task(s) from previous run", recovered.len());
    }

    let listener = ctx.scheduler.spawn_event_listener(events_rx);
    let mut updates = ctx.events.subscribe_queue_updated();
    ctx.scheduler.resume().await;
    println!(
        "Running queue with {} worker slot(s)",
        ctx.scheduler.capacity().await
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    let mut interrupted = false;
    let snapshot = loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                println!("Interrupted; waiting for running tasks to finish");
                ctx.scheduler.pause().await;
                interrupted = true;
            }
            Some(update) = updates.recv() => {
                tracing::debug!(
                    waiting = update.waiting_count,
                    running = update.running_count,
                    "queue update"
                );
            }
            _ = poll.tick() => {
                // Reconciles and dispatches too, so lost tasks and rows added
                // by other `dubq` commands get started while we wait.
                let snapshot = ctx.scheduler.get_snapshot().await?;
                let stopped = snapshot.paused && snapshot.running.is_empty();
                if stopped || ctx.scheduler.is_idle().await? {
                    break snapshot;
                }
            }
        }
    };
    listener.abort();

    println!(
        "{} completed, {} failed, {} waiting",
        snapshot.completed.len(),
        snapshot.failed.len(),
        snapshot.waiting.len()
    );
    if snapshot.paused && !interrupted {
        println!("Queue paused after repeated failures; check `dubq status` and `dubq plan <id>`");
    }
    Ok(())
}
