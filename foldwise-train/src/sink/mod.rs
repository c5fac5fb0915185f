//! Logging and checkpoint sinks.
//!
//! A sink receives everything a training session reports: the per-epoch
//! metric bundles, model checkpoints, and the end-of-session plot and finish
//! calls. [`LoggingSession`] guarantees the latter two happen exactly once.

pub mod console;
pub mod file;

pub use console::ConsoleSink;
pub use file::FileSink;

use crate::error::TrainError;
use crate::metrics::MetricsBundle;
use crate::model::ModelState;

/// Capability set of a logging/checkpoint destination.
pub trait MetricsSink {
    /// Start a session under `run_name`.
    fn init(&mut self, run_name: &str) -> Result<(), TrainError>;

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError>;

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError>;

    /// Render the session's metric history.
    fn plot_metrics(&mut self) -> Result<(), TrainError>;

    /// Close the session. Called exactly once per session.
    fn finish(&mut self) -> Result<(), TrainError>;
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn init(&mut self, run_name: &str) -> Result<(), TrainError> {
        (**self).init(run_name)
    }

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError> {
        (**self).log_metrics(metrics)
    }

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError> {
        (**self).save_model(model, tag)
    }

    fn plot_metrics(&mut self) -> Result<(), TrainError> {
        (**self).plot_metrics()
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        (**self).finish()
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn init(&mut self, run_name: &str) -> Result<(), TrainError> {
        (**self).init(run_name)
    }

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError> {
        (**self).log_metrics(metrics)
    }

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError> {
        (**self).save_model(model, tag)
    }

    fn plot_metrics(&mut self) -> Result<(), TrainError> {
        (**self).plot_metrics()
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        (**self).finish()
    }
}

/// Scoped logging session.
///
/// Once created, the sink's `plot_metrics` and `finish` run exactly once:
/// through [`LoggingSession::close`] on the normal path, or from `Drop` when
/// the session is abandoned by an early return or a panic. Errors raised
/// while closing from `Drop` are logged and discarded.
pub struct LoggingSession<'a> {
    sink: &'a mut dyn MetricsSink,
    closed: bool,
}

impl<'a> LoggingSession<'a> {
    pub fn new(sink: &'a mut dyn MetricsSink) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    pub fn sink(&mut self) -> &mut (dyn MetricsSink + 'a) {
        &mut *self.sink
    }

    /// Plot, then finish. `finish` runs even if plotting fails; the first
    /// error is returned.
    pub fn close(mut self) -> Result<(), TrainError> {
        self.closed = true;
        let plotted = self.sink.plot_metrics();
        let finished = self.sink.finish();
        plotted.and(finished)
    }
}

impl Drop for LoggingSession<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.sink.plot_metrics() {
            tracing::warn!(error = %e, "Failed to plot metrics while closing session");
        }
        if let Err(e) = self.sink.finish() {
            tracing::warn!(error = %e, "Failed to finish logging session");
        }
    }
}
