//! Tests for the database layer (in-memory DB unless noted).

use crate::db::{
    BatchItemStatus, BatchStatus, Db, NewBatch, NewBatchUrl, QueueStatus, SegmentStatus,
    SnapshotDocument, TaskConfig, TaskStatus,
};

fn waiting_ids(records: &[crate::db::QueueTaskRecord]) -> Vec<i64> {
    records
        .iter()
        .filter(|r| r.queue_status == QueueStatus::Waiting)
        .map(|r| r.task_id)
        .collect()
}

#[tokio::test]
async fn enqueued_task_is_claimed_exactly_once() {
    let db = Db::open_in_memory().await.unwrap();
    db.enqueue_waiting(7, None, 0).await.unwrap();

    let first = db.claim_waiting(1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].task_id, 7);
    assert_eq!(first[0].queue_status, QueueStatus::Running);
    assert!(first[0].started_at.is_some());

    assert!(db.claim_waiting(1).await.unwrap().is_empty());
    let counts = db.queue_counts().await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.running, 1);
}

#[tokio::test]
async fn fifo_order_with_priority_insert() {
    let db = Db::open_in_memory().await.unwrap();
    db.enqueue_waiting(1, None, 0).await.unwrap();
    db.enqueue_waiting(2, None, 0).await.unwrap();
    db.enqueue_waiting(3, None, 5).await.unwrap();
    db.enqueue_waiting(4, None, 0).await.unwrap();

    let queue = db.list_queue().await.unwrap();
    assert_eq!(waiting_ids(&queue), vec![3, 1, 2, 4]);

    let claimed = db.claim_waiting(2).await.unwrap();
    let ids: Vec<i64> = claimed.iter().map(|r| r.task_id).collect();
    assert_eq!(ids, vec![3, 1]);
}

#[tokio::test]
async fn re_enqueue_replaces_existing_row() {
    let db = Db::open_in_memory().await.unwrap();
    db.enqueue_waiting(1, None, 0).await.unwrap();
    db.enqueue_waiting(2, None, 0).await.unwrap();
    db.enqueue_waiting(1, Some(9), 0).await.unwrap();

    let queue = db.list_queue().await.unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(waiting_ids(&queue), vec![2, 1]);
    let rec = db.get_queue_record(1).await.unwrap().unwrap();
    assert_eq!(rec.batch_id, Some(9));
}

#[tokio::test]
async fn reorder_moves_and_clamps() {
    let db = Db::open_in_memory().await.unwrap();
    for id in 1..=4 {
        db.enqueue_waiting(id, None, 0).await.unwrap();
    }

    assert_eq!(db.reorder_waiting(4, 0).await.unwrap(), Some((3, 0)));
    assert_eq!(waiting_ids(&db.list_queue().await.unwrap()), vec![4, 1, 2, 3]);

    assert_eq!(db.reorder_waiting(4, 99).await.unwrap(), Some((0, 3)));
    assert_eq!(waiting_ids(&db.list_queue().await.unwrap()), vec![1, 2, 3, 4]);

    assert_eq!(db.reorder_waiting(42, 0).await.unwrap(), None);

    db.claim_waiting(1).await.unwrap();
    assert_eq!(db.reorder_waiting(1, 2).await.unwrap(), None);
}

#[tokio::test]
async fn requeue_keeps_position_and_tail_move_goes_last() {
    let db = Db::open_in_memory().await.unwrap();
    for id in 1..=3 {
        db.enqueue_waiting(id, None, 0).await.unwrap();
    }
    let claimed = db.claim_waiting(1).await.unwrap();
    assert_eq!(claimed[0].task_id, 1);
    db.mark_queue_running(1, 0).await.unwrap();

    assert_eq!(db.requeue_queue_records(&[1]).await.unwrap(), 1);
    let rec = db.get_queue_record(1).await.unwrap().unwrap();
    assert_eq!(rec.queue_status, QueueStatus::Waiting);
    assert_eq!(rec.worker_slot, None);
    assert_eq!(rec.started_at, None);
    assert_eq!(waiting_ids(&db.list_queue().await.unwrap()), vec![1, 2, 3]);

    db.claim_waiting(1).await.unwrap();
    db.mark_queue_finished(1, QueueStatus::Failed, Some("E_X"))
        .await
        .unwrap();
    let rec = db.get_queue_record(1).await.unwrap().unwrap();
    assert_eq!(rec.last_error_code.as_deref(), Some("E_X"));
    assert!(rec.finished_at.is_some());

    assert!(db.move_queue_record_to_tail(1).await.unwrap());
    assert_eq!(waiting_ids(&db.list_queue().await.unwrap()), vec![2, 3, 1]);
    let rec = db.get_queue_record(1).await.unwrap().unwrap();
    assert_eq!(rec.last_error_code, None);
}

#[tokio::test]
async fn remove_only_affects_waiting_rows() {
    let db = Db::open_in_memory().await.unwrap();
    db.enqueue_waiting(1, None, 0).await.unwrap();
    db.enqueue_waiting(2, None, 0).await.unwrap();
    db.claim_waiting(1).await.unwrap();

    assert!(!db.remove_waiting(1).await.unwrap());
    assert!(db.remove_waiting(2).await.unwrap());
    assert!(db.get_queue_record(2).await.unwrap().is_none());
    assert!(db.get_queue_record(1).await.unwrap().is_some());
}

#[tokio::test]
async fn stale_running_uses_start_time_cutoff() {
    let db = Db::open_in_memory().await.unwrap();
    db.enqueue_waiting(1, None, 0).await.unwrap();
    let claimed = db.claim_waiting(1).await.unwrap();
    let started = claimed[0].started_at.unwrap();

    assert!(db.list_stale_running(started).await.unwrap().is_empty());
    let stale = db.list_stale_running(started + 1).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].task_id, 1);
}

#[tokio::test]
async fn task_status_roundtrip_via_db() {
    let db = Db::open_in_memory().await.unwrap();
    let cfg = TaskConfig {
        voice: Some("alloy".to_string()),
        ..TaskConfig::default()
    };
    let id = db
        .insert_task("https://youtu.be/abc", &cfg, None)
        .await
        .unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.config, cfg);

    db.set_task_status(id, TaskStatus::Failed, Some("E_NET"), Some("timeout"))
        .await
        .unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code.as_deref(), Some("E_NET"));

    db.reset_tasks_to_queued(&[id, 999]).await.unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.error_code, None);
    assert_eq!(task.error_message, None);

    assert!(!db
        .set_task_status(999, TaskStatus::Running, None, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn insert_batch_creates_tasks_and_items() {
    let db = Db::open_in_memory().await.unwrap();
    let batch = NewBatch {
        name: "evening".to_string(),
        total_count: 3,
        urls: vec![
            NewBatchUrl {
                index: 0,
                url: "https://youtu.be/a".to_string(),
                reject_reason: None,
            },
            NewBatchUrl {
                index: 1,
                url: "ftp://x".to_string(),
                reject_reason: Some("Invalid YouTube URL".to_string()),
            },
            NewBatchUrl {
                index: 2,
                url: "https://youtu.be/b".to_string(),
                reject_reason: None,
            },
        ],
        config: TaskConfig::default(),
    };
    let inserted = db.insert_batch(&batch).await.unwrap();
    assert_eq!(inserted.task_ids.len(), 2);

    let record = db.get_batch(inserted.batch_id).await.unwrap().unwrap();
    assert_eq!(record.total_count, 3);
    assert_eq!(record.accepted_count, 2);
    assert_eq!(record.rejected_count, 1);
    assert_eq!(record.status, BatchStatus::Created);

    let items = db.list_batch_items(inserted.batch_id).await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].task_id, Some(inserted.task_ids[0]));
    assert_eq!(items[1].status, BatchItemStatus::Rejected);
    assert_eq!(items[1].task_id, None);
    assert_eq!(items[2].task_id, Some(inserted.task_ids[1]));

    let task = db.get_task(inserted.task_ids[1]).await.unwrap().unwrap();
    assert_eq!(task.batch_id, Some(inserted.batch_id));
    assert_eq!(task.source_url, "https://youtu.be/b");

    db.set_batch_item_status(inserted.task_ids[0], BatchItemStatus::Completed, None)
        .await
        .unwrap();
    let counts = db.batch_item_counts(inserted.batch_id).await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.rejected, 1);
}

#[tokio::test]
async fn batch_with_no_accepted_urls_starts_failed() {
    let db = Db::open_in_memory().await.unwrap();
    let batch = NewBatch {
        name: "empty".to_string(),
        total_count: 1,
        urls: vec![NewBatchUrl {
            index: 0,
            url: "nope".to_string(),
            reject_reason: Some("Invalid YouTube URL".to_string()),
        }],
        config: TaskConfig::default(),
    };
    let inserted = db.insert_batch(&batch).await.unwrap();
    assert!(inserted.task_ids.is_empty());
    let record = db.get_batch(inserted.batch_id).await.unwrap().unwrap();
    assert_eq!(record.status, BatchStatus::Failed);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn segment_upsert_keeps_one_row_per_index() {
    let db = Db::open_in_memory().await.unwrap();
    let a = db
        .upsert_segment(1, "tts", 0, SegmentStatus::Running, None, None)
        .await
        .unwrap();
    let b = db
        .upsert_segment(1, "tts", 0, SegmentStatus::Failed, Some("E_TTS"), Some("rate limited"))
        .await
        .unwrap();
    assert_eq!(a, b);
    db.upsert_segment(1, "tts", 1, SegmentStatus::Success, None, None)
        .await
        .unwrap();
    db.upsert_segment(1, "translate", 0, SegmentStatus::Success, None, None)
        .await
        .unwrap();

    let tts = db.list_segments(1, Some("tts")).await.unwrap();
    assert_eq!(tts.len(), 2);
    assert!(tts[0].started_at.is_some());
    assert!(tts[0].finished_at.is_some());
    assert_eq!(db.list_segments(1, None).await.unwrap().len(), 3);

    let failed = db.list_failed_segments(1).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_code.as_deref(), Some("E_TTS"));
}

#[tokio::test]
async fn latest_snapshot_prefers_last_inserted() {
    let db = Db::open_in_memory().await.unwrap();
    let doc = |checkpoint| SnapshotDocument {
        successful_segment_ids: vec![1],
        failed_segment_ids: vec![],
        checkpoint_segment_id: checkpoint,
        config_snapshot: serde_json::json!({}),
    };
    db.insert_snapshot(5, "tts", "tts:1", &doc(1)).await.unwrap();
    db.insert_snapshot(5, "tts", "tts:2", &doc(2)).await.unwrap();

    let latest = db.latest_snapshot(5).await.unwrap().unwrap();
    assert_eq!(latest.checkpoint_key, "tts:2");
    assert_eq!(latest.snapshot.checkpoint_segment_id, 2);
    assert_eq!(db.list_snapshots(5).await.unwrap().len(), 2);
    assert!(db.latest_snapshot(6).await.unwrap().is_none());
}

#[tokio::test]
async fn open_at_persists_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("dubq.db");
    {
        let db = Db::open_at(&path).await.unwrap();
        db.enqueue_waiting(11, None, 0).await.unwrap();
        db.claim_waiting(1).await.unwrap();
    }
    let db = Db::open_at(&path).await.unwrap();
    let rec = db.get_queue_record(11).await.unwrap().unwrap();
    assert_eq!(rec.queue_status, QueueStatus::Running);
}
