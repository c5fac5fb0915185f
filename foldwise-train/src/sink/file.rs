//! Sink that writes every session into its own run directory.
//!
//! Layout of one session:
//!
//! ```text
//! <base_dir>/<run_name>-<timestamp>-<id>/
//!     metrics.jsonl           one record per log_metrics call
//!     checkpoints/<tag>.bin   model states
//!     checkpoints/checkpoints.json
//!     history.csv             written by plot_metrics
//!     history.json            written by plot_metrics
//!     run.json                written by finish
//! ```

use super::MetricsSink;
use crate::checkpoint::CheckpointManager;
use crate::error::TrainError;
use crate::metrics::{MetricsBundle, MetricsHistory};
use crate::model::ModelState;
use crate::persistence::{append_json_line, atomic_write, atomic_write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One line of `metrics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "crate::metrics::nan_as_null")]
    pub metrics: MetricsBundle,
}

/// Contents of `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub epochs_logged: usize,
    pub checkpoints: Vec<String>,
    #[serde(default, with = "crate::metrics::nan_as_null::option")]
    pub final_metrics: Option<MetricsBundle>,
}

struct ActiveRun {
    run_name: String,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    history: MetricsHistory,
    checkpoints: CheckpointManager,
    saved_tags: Vec<String>,
}

/// Writes metrics, checkpoints and history files below `base_dir`.
pub struct FileSink {
    base_dir: PathBuf,
    max_checkpoints: Option<usize>,
    active: Option<ActiveRun>,
    completed: Vec<PathBuf>,
}

impl FileSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_checkpoints: None,
            active: None,
            completed: Vec::new(),
        }
    }

    /// Keep at most `max` checkpoints per session.
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = Some(max);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of the session in progress.
    pub fn run_dir(&self) -> Option<&Path> {
        self.active.as_ref().map(|run| run.dir.as_path())
    }

    /// Directories of finished sessions, oldest first.
    pub fn completed_runs(&self) -> &[PathBuf] {
        &self.completed
    }

    fn active_mut(&mut self, op: &str) -> Result<&mut ActiveRun, TrainError> {
        self.active
            .as_mut()
            .ok_or_else(|| TrainError::sink(format!("{op} called outside of a session")))
    }
}

impl MetricsSink for FileSink {
    fn init(&mut self, run_name: &str) -> Result<(), TrainError> {
        if let Some(previous) = &self.active {
            return Err(TrainError::sink(format!(
                "session '{}' is still open",
                previous.run_name
            )));
        }

        let started_at = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.base_dir.join(format!(
            "{run_name}-{}-{}",
            started_at.format("%Y%m%dT%H%M%S"),
            &id[..8]
        ));
        std::fs::create_dir_all(&dir)?;

        let mut checkpoints = CheckpointManager::new(dir.join("checkpoints"));
        if let Some(max) = self.max_checkpoints {
            checkpoints = checkpoints.with_max_checkpoints(max);
        }

        tracing::info!(run = run_name, dir = %dir.display(), "File logging session started");
        self.active = Some(ActiveRun {
            run_name: run_name.to_string(),
            dir,
            started_at,
            history: MetricsHistory::new(),
            checkpoints,
            saved_tags: Vec::new(),
        });
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError> {
        let run = self.active_mut("log_metrics")?;
        let record = MetricsRecord {
            step: run.history.len() + 1,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
        };
        append_json_line(&run.dir.join("metrics.jsonl"), &record)?;
        run.history.push(metrics.clone());
        Ok(())
    }

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError> {
        let run = self.active_mut("save_model")?;
        let state = model.state_bytes()?;
        let checkpoint = run.checkpoints.save(&run.run_name, tag, &state)?;
        tracing::info!(
            run = %run.run_name,
            tag,
            path = %checkpoint.path.display(),
            hash = %checkpoint.hash,
            "Checkpoint written"
        );
        run.saved_tags.push(tag.to_string());
        Ok(())
    }

    fn plot_metrics(&mut self) -> Result<(), TrainError> {
        let run = self.active_mut("plot_metrics")?;
        atomic_write(&run.dir.join("history.csv"), run.history.to_csv().as_bytes())?;
        atomic_write_json(&run.dir.join("history.json"), &run.history)?;
        tracing::debug!(run = %run.run_name, entries = run.history.len(), "Metric history exported");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        let run = self
            .active
            .take()
            .ok_or_else(|| TrainError::sink("finish called outside of a session"))?;

        let summary = RunSummary {
            run_name: run.run_name.clone(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            epochs_logged: run.history.len(),
            checkpoints: run.saved_tags,
            final_metrics: run.history.entries.last().cloned(),
        };
        // The session is closed even if the summary cannot be written.
        self.completed.push(run.dir.clone());
        atomic_write_json(&run.dir.join("run.json"), &summary)?;
        tracing::info!(run = %summary.run_name, epochs = summary.epochs_logged, "File logging session finished");
        Ok(())
    }
}
