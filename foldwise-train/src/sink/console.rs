//! Sink that reports through `tracing`.

use super::MetricsSink;
use crate::error::TrainError;
use crate::metrics::{MetricsBundle, MetricsHistory};
use crate::model::ModelState;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// A checkpoint the console sink was asked to save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedModel {
    pub tag: String,
    pub size_bytes: usize,
}

/// Logs metrics and checkpoint events; keeps nothing on disk.
///
/// `plot_metrics` renders each metric's history as a one-line sparkline.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    run_name: Option<String>,
    history: MetricsHistory,
    captured: Vec<CapturedModel>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_name(&self) -> Option<&str> {
        self.run_name.as_deref()
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn captured(&self) -> &[CapturedModel] {
        &self.captured
    }

    fn active_run(&self, op: &str) -> Result<&str, TrainError> {
        self.run_name
            .as_deref()
            .ok_or_else(|| TrainError::sink(format!("{op} called outside of a session")))
    }
}

impl MetricsSink for ConsoleSink {
    fn init(&mut self, run_name: &str) -> Result<(), TrainError> {
        self.run_name = Some(run_name.to_string());
        self.history.clear();
        self.captured.clear();
        tracing::info!(run = run_name, "Logging session started");
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError> {
        let run = self.active_run("log_metrics")?;
        let rendered = metrics
            .iter()
            .map(|(k, v)| format!("{k}={v:.6}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(run, step = self.history.len() + 1, "{rendered}");
        self.history.push(metrics.clone());
        Ok(())
    }

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError> {
        let run = self.active_run("save_model")?;
        let size_bytes = model.state_bytes()?.len();
        tracing::info!(run, tag, size_bytes, "Model state captured");
        self.captured.push(CapturedModel {
            tag: tag.to_string(),
            size_bytes,
        });
        Ok(())
    }

    fn plot_metrics(&mut self) -> Result<(), TrainError> {
        let run = self.active_run("plot_metrics")?;
        for name in self.history.metric_names() {
            let series: Vec<f64> = self.history.series(&name).into_iter().flatten().collect();
            if let Some((min, max, last)) = self.history.summary(&name) {
                tracing::info!(
                    run,
                    metric = %name,
                    "{} min={min:.4} max={max:.4} last={last:.4}",
                    sparkline(&series)
                );
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        let run = self.active_run("finish")?;
        tracing::info!(
            run,
            epochs = self.history.len(),
            checkpoints = self.captured.len(),
            "Logging session finished"
        );
        self.run_name = None;
        Ok(())
    }
}

/// One block character per value, scaled between the series' min and max.
/// NaN renders as a space.
pub fn sparkline(values: &[f64]) -> String {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = max - min;
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                ' '
            } else if span <= f64::EPSILON {
                SPARK_LEVELS[SPARK_LEVELS.len() / 2]
            } else {
                let level = ((v - min) / span * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
                SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
            }
        })
        .collect()
}
