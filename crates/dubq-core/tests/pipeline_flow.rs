//! Scheduler driven by the process pipeline and its event listener.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use dubq_core::db::{Db, QueueStatus, TaskId};
use dubq_core::events::EventBus;
use dubq_core::pipeline::ProcessPipeline;
use dubq_core::queue::QueueStore;
use dubq_core::scheduler::QueueScheduler;

use common::{enqueue_all, options, tasks};

async fn wait_until_completed(scheduler: &QueueScheduler, ids: &[TaskId]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let mut done = true;
        for &id in ids {
            let record = scheduler.store().get(id).await.unwrap().unwrap();
            if record.queue_status != QueueStatus::Completed {
                done = false;
            }
        }
        if done {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            let snapshot = scheduler.store().get_snapshot(false).await.unwrap();
            panic!(
                "queue stuck: running={:?} waiting={:?} completed={:?}",
                snapshot.running_ids(),
                snapshot.waiting_ids(),
                snapshot.completed.iter().map(|r| r.task_id).collect::<Vec<_>>()
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chatty_task_does_not_stall_the_next_start() {
    let db = Db::open_in_memory().await.unwrap();
    let ids = tasks(&db, 3).await;
    // First task floods stdout, second finishes early and frees its slot
    // while the channel is full, third must still start and finish.
    let script = format!(
        "case \"$DUBQ_TASK_ID\" in {}) yes spam | head -n 200000 ;; {}) sleep 0.3 ;; *) exit 0 ;; esac",
        ids[0], ids[1]
    );
    let (tx, rx) = mpsc::channel(8);
    let pipeline = Arc::new(ProcessPipeline::new(
        db.clone(),
        vec!["sh".to_string(), "-c".to_string(), script],
        tx,
    ));
    let scheduler = QueueScheduler::new(
        QueueStore::new(db.clone()),
        pipeline,
        EventBus::new(),
        options(2),
    );
    let listener = scheduler.spawn_event_listener(rx);

    enqueue_all(&scheduler, &ids).await;
    wait_until_completed(&scheduler, &ids).await;
    assert!(scheduler.running_task_ids().await.is_empty());
    listener.abort();
}
