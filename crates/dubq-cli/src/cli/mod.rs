//! CLI for the dubq conversion queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dubq_core::config;
use dubq_core::db::{Db, TaskConfig};
use std::path::PathBuf;

use commands::{
    run_add, run_batches, run_plan, run_queue, run_remove, run_reorder, run_requeue, run_status,
};

/// Top-level CLI for the dubq conversion queue.
#[derive(Debug, Parser)]
#[command(name = "dubq")]
#[command(about = "dubq: queue and run video dubbing tasks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add video URLs as one batch; every accepted URL becomes a queued task.
    Add {
        /// Video URLs.
        urls: Vec<String>,
        /// Also read URLs from a file (JSON array, or one URL per line).
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Batch name (default: batch-<unix seconds>).
        #[arg(long)]
        name: Option<String>,
        /// Target language code.
        #[arg(long, value_name = "LANG")]
        language: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        voice: Option<String>,
    },

    /// Recover interrupted tasks, then run queued tasks until the queue drains.
    Run {
        /// Worker slots for this run (1 or 2); overrides the config file.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Show the queue.
    Status,

    /// Put a finished task back at the end of the queue.
    Requeue {
        /// Task identifier.
        id: i64,
    },

    /// Remove a task that has not started yet.
    Remove {
        /// Task identifier.
        id: i64,
    },

    /// Move a waiting task to a new position (0 = next to run).
    Reorder {
        /// Task identifier.
        id: i64,
        index: usize,
    },

    /// Show the recovery plan for a failed task.
    Plan {
        /// Task identifier.
        id: i64,
    },

    /// List batches, or the items of one batch.
    Batches {
        /// Batch identifier.
        id: Option<i64>,
    },
}

/// Shared config for a new batch: defaults overridden by the given flags.
pub(crate) fn task_config(
    language: Option<String>,
    provider: Option<String>,
    voice: Option<String>,
) -> TaskConfig {
    let mut cfg = TaskConfig::default();
    if let Some(language) = language {
        cfg.target_language = language;
    }
    if let Some(provider) = provider {
        cfg.provider = provider;
    }
    cfg.voice = voice;
    cfg
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = Db::open_default().await?;

        match cli.command {
            CliCommand::Add {
                urls,
                file,
                name,
                language,
                provider,
                voice,
            } => {
                let task_cfg = task_config(language, provider, voice);
                run_add(&cfg, db, &urls, file.as_deref(), name.as_deref(), &task_cfg).await?;
            }
            CliCommand::Run { concurrency } => run_queue(&cfg, db, concurrency).await?,
            CliCommand::Status => run_status(&db).await?,
            CliCommand::Requeue { id } => run_requeue(&cfg, db, id).await?,
            CliCommand::Remove { id } => run_remove(&cfg, db, id).await?,
            CliCommand::Reorder { id, index } => run_reorder(&cfg, db, id, index).await?,
            CliCommand::Plan { id } => run_plan(&db, id).await?,
            CliCommand::Batches { id } => run_batches(&db, id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
