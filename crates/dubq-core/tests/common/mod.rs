//! Shared fixtures: an in-memory database and a scripted pipeline.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dubq_core::db::{Db, TaskConfig, TaskId};
use dubq_core::events::EventBus;
use dubq_core::pipeline::{Pipeline, PipelineError, PipelineEvent, StartOutcome};
use dubq_core::queue::QueueStore;
use dubq_core::scheduler::{QueueScheduler, SchedulerOptions};

#[derive(Default)]
struct FakeState {
    outcomes: VecDeque<StartOutcome>,
    running: BTreeSet<TaskId>,
    attempts: Vec<TaskId>,
    started: Vec<TaskId>,
    primed: Vec<TaskId>,
    without_checkpoint: HashSet<TaskId>,
}

/// Pipeline double. Answers starts from a script (default: accept) and
/// remembers what it was asked to do.
#[derive(Default)]
pub struct FakePipeline {
    state: Mutex<FakeState>,
}

impl FakePipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue up answers for the next start requests.
    pub fn script(&self, outcomes: impl IntoIterator<Item = StartOutcome>) {
        self.state.lock().unwrap().outcomes.extend(outcomes);
    }

    /// Pretend these tasks are executing (e.g. survived a scheduler restart).
    pub fn set_running(&self, ids: &[TaskId]) {
        self.state.lock().unwrap().running.extend(ids.iter().copied());
    }

    pub fn without_checkpoint(&self, task_id: TaskId) {
        self.state.lock().unwrap().without_checkpoint.insert(task_id);
    }

    pub fn attempts(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn started(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn primed(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().primed.clone()
    }

    fn stop(&self, task_id: TaskId) {
        self.state.lock().unwrap().running.remove(&task_id);
    }
}

#[async_trait]
impl Pipeline for FakePipeline {
    async fn start(&self, task_id: TaskId) -> StartOutcome {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(task_id);
        let outcome = state.outcomes.pop_front().unwrap_or(StartOutcome::Accepted);
        if outcome.is_accepted() {
            state.running.insert(task_id);
            state.started.push(task_id);
        }
        outcome
    }

    async fn cancel(&self, task_id: TaskId) -> Result<(), PipelineError> {
        self.stop(task_id);
        Ok(())
    }

    async fn retry(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError> {
        Ok(self.start(task_id).await)
    }

    async fn retry_segments(
        &self,
        task_id: TaskId,
        _segment_ids: &[i64],
    ) -> Result<StartOutcome, PipelineError> {
        Ok(self.start(task_id).await)
    }

    async fn resume_from_checkpoint(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError> {
        Ok(self.start(task_id).await)
    }

    fn running_task_ids(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().running.iter().copied().collect()
    }

    async fn prepare_resume_from_checkpoint(&self, task_id: TaskId) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        if state.without_checkpoint.contains(&task_id) {
            return Err(PipelineError::NoCheckpoint(task_id));
        }
        state.primed.push(task_id);
        Ok(())
    }
}

pub fn options(concurrency: usize) -> SchedulerOptions {
    SchedulerOptions {
        concurrency,
        start_retry_delay: Duration::from_millis(20),
        ..SchedulerOptions::default()
    }
}

pub fn paused(concurrency: usize) -> SchedulerOptions {
    SchedulerOptions {
        start_paused: true,
        ..options(concurrency)
    }
}

pub fn scheduler_on(
    db: &Db,
    pipeline: &Arc<FakePipeline>,
    options: SchedulerOptions,
) -> Arc<QueueScheduler> {
    QueueScheduler::new(
        QueueStore::new(db.clone()),
        pipeline.clone(),
        EventBus::new(),
        options,
    )
}

pub async fn setup(options: SchedulerOptions) -> (Db, Arc<FakePipeline>, Arc<QueueScheduler>) {
    let db = Db::open_in_memory().await.unwrap();
    let pipeline = FakePipeline::new();
    let scheduler = scheduler_on(&db, &pipeline, options);
    (db, pipeline, scheduler)
}

/// Insert `n` standalone tasks.
pub async fn tasks(db: &Db, n: usize) -> Vec<TaskId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let url = format!("https://youtu.be/video{}", i);
        ids.push(db.insert_task(&url, &TaskConfig::default(), None).await.unwrap());
    }
    ids
}

pub async fn enqueue_all(scheduler: &QueueScheduler, ids: &[TaskId]) {
    for &id in ids {
        scheduler.enqueue_task(id, None, 0).await.unwrap();
    }
}

/// The pipeline finishes `event.task_id` and reports it.
pub async fn report(scheduler: &QueueScheduler, pipeline: &FakePipeline, event: PipelineEvent) {
    pipeline.stop(event.task_id);
    scheduler.handle_pipeline_event(event).await.unwrap();
}
