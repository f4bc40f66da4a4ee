use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerOptions;

/// Reconciliation backoff (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay after the second consecutive pass that had to demote tasks.
    pub base_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// External command that runs one task. `{task_id}` and `{url}` in any
/// argument are substituted before spawning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub command: Vec<String>,
}

/// Global configuration loaded from `~/.config/dubq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DubqConfig {
    /// Worker slots (clamped to 1..=2).
    pub concurrency: usize,
    /// Consecutive task failures that pause the queue (0 = never).
    pub auto_pause_threshold: u32,
    /// Running records older than this are requeued at startup.
    pub stale_timeout_secs: u64,
    /// Delay before retrying a start the pipeline answered with "already running".
    pub start_retry_delay_ms: u64,
    /// Per-batch URL limit (never above 200).
    pub max_batch_urls: usize,
    pub reconcile: Option<ReconcileConfig>,
    /// Pipeline command; if missing, tasks cannot be started from the CLI.
    pub pipeline: Option<PipelineConfig>,
}

impl Default for DubqConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            auto_pause_threshold: 3,
            stale_timeout_secs: 600,
            start_retry_delay_ms: 200,
            max_batch_urls: 200,
            reconcile: None,
            pipeline: None,
        }
    }
}

impl DubqConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        let reconcile = self.reconcile.clone().unwrap_or_default();
        SchedulerOptions {
            concurrency: self.concurrency,
            auto_pause_threshold: self.auto_pause_threshold,
            start_retry_delay: Duration::from_millis(self.start_retry_delay_ms),
            reconcile_base_backoff: Duration::from_millis(reconcile.base_backoff_ms),
            reconcile_max_backoff: Duration::from_millis(reconcile.max_backoff_ms),
            start_paused: false,
        }
    }

    pub fn pipeline_command(&self) -> Option<&[String]> {
        self.pipeline
            .as_ref()
            .map(|p| p.command.as_slice())
            .filter(|c| !c.is_empty())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dubq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DubqConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<DubqConfig> {
    if !path.exists() {
        let default_cfg = DubqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: DubqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DubqConfig::default();
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.auto_pause_threshold, 3);
        assert_eq!(cfg.stale_timeout(), Duration::from_secs(600));
        assert!(cfg.pipeline_command().is_none());
    }

    #[test]
    fn config_toml_partial_file_uses_defaults() {
        let cfg: DubqConfig = toml::from_str("concurrency = 2").unwrap();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.max_batch_urls, 200);
        assert!(cfg.reconcile.is_none());
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            auto_pause_threshold = 5
            start_retry_delay_ms = 50

            [reconcile]
            base_backoff_ms = 100
            max_backoff_ms = 1000

            [pipeline]
            command = ["dub-video", "--task", "{task_id}", "{url}"]
        "#;
        let cfg: DubqConfig = toml::from_str(toml).unwrap();
        let opts = cfg.scheduler_options();
        assert_eq!(opts.auto_pause_threshold, 5);
        assert_eq!(opts.start_retry_delay, Duration::from_millis(50));
        assert_eq!(opts.reconcile_base_backoff, Duration::from_millis(100));
        assert_eq!(opts.reconcile_max_backoff, Duration::from_secs(1));
        assert_eq!(cfg.pipeline_command().unwrap()[0], "dub-video");
    }

    #[test]
    fn empty_pipeline_command_counts_as_missing() {
        let cfg: DubqConfig = toml::from_str("[pipeline]\ncommand = []").unwrap();
        assert!(cfg.pipeline_command().is_none());
    }

    #[test]
    fn load_or_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dubq").join("config.toml");
        let cfg = load_or_init_at(&path).unwrap();
        assert_eq!(cfg.concurrency, 1);
        assert!(path.exists());

        fs::write(&path, "concurrency = 2\n").unwrap();
        assert_eq!(load_or_init_at(&path).unwrap().concurrency, 2);
    }
}
