//! Pipeline adapter that runs one external command per task.
//!
//! The command gets the task through `{task_id}` / `{url}` placeholders and
//! `DUBQ_*` environment variables. It reports back on stdout, one line per
//! report:
//!
//! ```text
//! progress <stage> <percent>
//! segment <stage> <index> <pending|running|success|failed> [error_code]
//! checkpoint <stage> <segment_id>
//! ```
//!
//! Any other line is forwarded as a runtime message. Exit status 0 completes
//! the task; anything else fails it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::{Pipeline, PipelineError, PipelineEvent, PipelineEventKind, StartOutcome};
use crate::checkpoint::CheckpointStore;
use crate::db::{Db, SegmentId, SegmentStatus, TaskId, TaskStatus};

pub const E_TASK_CANCELED: &str = "E_TASK_CANCELED";

/// How a run should begin.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Launch {
    Fresh,
    Segments(Vec<SegmentId>),
    Checkpoint(String),
}

/// One parsed stdout line.
#[derive(Debug, Clone, PartialEq)]
enum Report {
    Progress {
        stage: String,
        percent: f64,
    },
    Segment {
        stage: String,
        index: i64,
        status: SegmentStatus,
        error_code: Option<String>,
    },
    Checkpoint {
        stage: String,
        segment_id: SegmentId,
    },
    Message(String),
}

fn parse_report(line: &str) -> Report {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["progress", stage, percent] => match percent.parse::<f64>() {
            Ok(percent) => Report::Progress {
                stage: stage.to_string(),
                percent,
            },
            Err(_) => Report::Message(line.to_string()),
        },
        ["segment", stage, index, status, rest @ ..] if rest.len() <= 1 => {
            match index.parse::<i64>() {
                Ok(index) => Report::Segment {
                    stage: stage.to_string(),
                    index,
                    status: SegmentStatus::from_str(status),
                    error_code: rest.first().map(|c| c.to_string()),
                },
                Err(_) => Report::Message(line.to_string()),
            }
        }
        ["checkpoint", stage, segment_id] => match segment_id.parse::<SegmentId>() {
            Ok(segment_id) => Report::Checkpoint {
                stage: stage.to_string(),
                segment_id,
            },
            Err(_) => Report::Message(line.to_string()),
        },
        _ => Report::Message(line.to_string()),
    }
}

fn expand_placeholders(arg: &str, task_id: TaskId, url: &str) -> String {
    arg.replace("{task_id}", &task_id.to_string())
        .replace("{url}", url)
}

type RunningMap = Arc<Mutex<HashMap<TaskId, oneshot::Sender<()>>>>;

pub struct ProcessPipeline {
    db: Db,
    checkpoints: CheckpointStore,
    command: Vec<String>,
    events: mpsc::Sender<PipelineEvent>,
    running: RunningMap,
    primed: Mutex<HashMap<TaskId, String>>,
}

impl ProcessPipeline {
    /// `command` is the program followed by its arguments. An empty command
    /// makes every start fail with a rejection.
    pub fn new(db: Db, command: Vec<String>, events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            checkpoints: CheckpointStore::new(db.clone()),
            db,
            command,
            events,
            running: Arc::new(Mutex::new(HashMap::new())),
            primed: Mutex::new(HashMap::new()),
        }
    }

    async fn launch(&self, task_id: TaskId, launch: Launch) -> StartOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return StartOutcome::Rejected("no pipeline command configured".to_string());
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.contains_key(&task_id) {
                return StartOutcome::AlreadyRunning;
            }
            running.insert(task_id, cancel_tx);
        }

        let outcome = self.spawn_child(task_id, program, args, launch, cancel_rx).await;
        if !outcome.is_accepted() {
            self.forget(task_id);
        }
        outcome
    }

    async fn spawn_child(
        &self,
        task_id: TaskId,
        program: &str,
        args: &[String],
        launch: Launch,
        cancel_rx: oneshot::Receiver<()>,
    ) -> StartOutcome {
        let task = match self.db.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return StartOutcome::Rejected(format!("task {} not found", task_id)),
            Err(e) => return StartOutcome::Rejected(format!("could not load task: {}", e)),
        };
        let config_json = match serde_json::to_string(&task.config) {
            Ok(json) => json,
            Err(e) => return StartOutcome::Rejected(format!("invalid task config: {}", e)),
        };

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| expand_placeholders(a, task_id, &task.source_url)))
            .env("DUBQ_TASK_ID", task_id.to_string())
            .env("DUBQ_SOURCE_URL", &task.source_url)
            .env("DUBQ_TASK_CONFIG", config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        match &launch {
            Launch::Fresh => {}
            Launch::Segments(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                cmd.env("DUBQ_RETRY_SEGMENTS", ids.join(","));
            }
            Launch::Checkpoint(key) => {
                cmd.env("DUBQ_RESUME_CHECKPOINT", key);
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StartOutcome::Rejected(format!("failed to spawn {}: {}", program, e));
            }
        };

        if let Err(e) = self
            .db
            .set_task_status(task_id, TaskStatus::Running, None, None)
            .await
        {
            tracing::warn!(task_id, error = %e, "could not mark task running");
        }
        tracing::info!(task_id, ?launch, "pipeline command started");
        // `start` can be called from the consumer of this channel, so it must
        // never wait for room.
        if let Err(e) = self
            .events
            .try_send(PipelineEvent::status(task_id, TaskStatus::Running))
        {
            tracing::debug!(task_id, error = %e, "running notice dropped");
        }

        let reader = child.stdout.take().map(|stdout| {
            tokio::spawn(read_reports(
                task_id,
                stdout,
                self.db.clone(),
                self.checkpoints.clone(),
                self.events.clone(),
            ))
        });

        let db = self.db.clone();
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel_rx => None,
            };
            let event = match waited {
                Some(Ok(status)) if status.success() => {
                    finish(&db, task_id, TaskStatus::Completed, None, None).await;
                    PipelineEvent::completed(task_id)
                }
                Some(Ok(status)) => {
                    let code = match status.code() {
                        Some(c) => format!("E_PIPELINE_EXIT_{}", c),
                        None => "E_PIPELINE_SIGNAL".to_string(),
                    };
                    let message = format!("pipeline command exited with {}", status);
                    finish(&db, task_id, TaskStatus::Failed, Some(&code), Some(&message)).await;
                    PipelineEvent::failed(task_id, Some(&code), Some(&message))
                }
                Some(Err(e)) => {
                    let message = format!("waiting for pipeline command failed: {}", e);
                    finish(&db, task_id, TaskStatus::Failed, Some("E_PIPELINE_WAIT"), Some(&message))
                        .await;
                    PipelineEvent::failed(task_id, Some("E_PIPELINE_WAIT"), Some(&message))
                }
                None => {
                    let _ = child.kill().await;
                    finish(&db, task_id, TaskStatus::Canceled, Some(E_TASK_CANCELED), None).await;
                    PipelineEvent::status(task_id, TaskStatus::Canceled)
                }
            };
            if let Some(reader) = reader {
                let _ = reader.await;
            }
            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task_id);
            let _ = events.send(event).await;
        });

        StartOutcome::Accepted
    }

    fn forget(&self, task_id: TaskId) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
    }

    fn take_primed(&self, task_id: TaskId) -> Option<String> {
        self.primed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id)
    }
}

async fn finish(
    db: &Db,
    task_id: TaskId,
    status: TaskStatus,
    code: Option<&str>,
    message: Option<&str>,
) {
    if let Err(e) = db.set_task_status(task_id, status, code, message).await {
        tracing::warn!(task_id, error = %e, "could not record task outcome");
    }
    tracing::info!(task_id, status = status.as_str(), code, "pipeline command finished");
}

async fn read_reports(
    task_id: TaskId,
    stdout: ChildStdout,
    db: Db,
    checkpoints: CheckpointStore,
    events: mpsc::Sender<PipelineEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(task_id, error = %e, "pipeline stdout closed");
                break;
            }
        };
        let kind = match parse_report(&line) {
            Report::Progress { stage, percent } => PipelineEventKind::Progress { stage, percent },
            Report::Segment {
                stage,
                index,
                status,
                error_code,
            } => {
                if let Err(e) = db
                    .upsert_segment(task_id, &stage, index, status, error_code.as_deref(), None)
                    .await
                {
                    tracing::warn!(task_id, error = %e, "could not record segment");
                }
                continue;
            }
            Report::Checkpoint { stage, segment_id } => {
                if let Err(e) = checkpoints
                    .save_segment_checkpoint(task_id, &stage, segment_id, serde_json::Value::Null)
                    .await
                {
                    tracing::warn!(task_id, error = %e, "could not save checkpoint");
                }
                continue;
            }
            Report::Message(message) => PipelineEventKind::Runtime { message },
        };
        if events.send(PipelineEvent { task_id, kind }).await.is_err() {
            break;
        }
    }
}

#[async_trait]
impl Pipeline for ProcessPipeline {
    async fn start(&self, task_id: TaskId) -> StartOutcome {
        let launch = match self.take_primed(task_id) {
            Some(key) => Launch::Checkpoint(key),
            None => Launch::Fresh,
        };
        self.launch(task_id, launch).await
    }

    async fn cancel(&self, task_id: TaskId) -> Result<(), PipelineError> {
        let sender = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => Err(PipelineError::NotRunning(task_id)),
        }
    }

    async fn retry(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError> {
        Ok(self.launch(task_id, Launch::Fresh).await)
    }

    async fn retry_segments(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<StartOutcome, PipelineError> {
        if segment_ids.is_empty() {
            return Err(PipelineError::Refused("no segments to retry".to_string()));
        }
        Ok(self
            .launch(task_id, Launch::Segments(segment_ids.to_vec()))
            .await)
    }

    async fn resume_from_checkpoint(&self, task_id: TaskId) -> Result<StartOutcome, PipelineError> {
        let snapshot = self
            .checkpoints
            .latest_snapshot(task_id)
            .await?
            .ok_or(PipelineError::NoCheckpoint(task_id))?;
        Ok(self
            .launch(task_id, Launch::Checkpoint(snapshot.checkpoint_key))
            .await)
    }

    fn running_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    async fn prepare_resume_from_checkpoint(&self, task_id: TaskId) -> Result<(), PipelineError> {
        if self.db.get_task(task_id).await?.is_none() {
            return Err(PipelineError::TaskNotFound(task_id));
        }
        let snapshot = self
            .checkpoints
            .latest_snapshot(task_id)
            .await?
            .ok_or(PipelineError::NoCheckpoint(task_id))?;
        tracing::debug!(task_id, key = %snapshot.checkpoint_key, "primed checkpoint resume");
        self.primed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id, snapshot.checkpoint_key);
        Ok(())
    }
}
