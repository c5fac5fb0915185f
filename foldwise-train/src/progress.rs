//! Per-batch progress reporting.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;

/// Which half of an epoch a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Validation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "Train"),
            Phase::Validation => write!(f, "Validation"),
        }
    }
}

/// Receives progress from the epoch loop.
///
/// `total_steps` passed to `begin_epoch` covers both training and validation
/// batches; `advance` is called once per batch with the running average loss
/// of the current phase.
pub trait Progress {
    fn begin_epoch(&mut self, epoch: usize, total_epochs: usize, total_steps: usize);

    fn advance(&mut self, phase: Phase, average_loss: f64);

    fn end_epoch(&mut self);
}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn begin_epoch(&mut self, epoch: usize, total_epochs: usize, total_steps: usize) {
        (**self).begin_epoch(epoch, total_epochs, total_steps)
    }

    fn advance(&mut self, phase: Phase, average_loss: f64) {
        (**self).advance(phase, average_loss)
    }

    fn end_epoch(&mut self) {
        (**self).end_epoch()
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin_epoch(&mut self, _epoch: usize, _total_epochs: usize, _total_steps: usize) {}

    fn advance(&mut self, _phase: Phase, _average_loss: f64) {}

    fn end_epoch(&mut self) {}
}

const BAR_TEMPLATE: &str = "{prefix} {bar:30.cyan/blue} {pos}/{len} [{elapsed}<{eta}] {msg}";

/// Terminal progress bar, one bar per epoch.
///
/// The message shows the running average loss and the phase, e.g.
/// `Avg Val Loss: 0.412345 | Phase: Validation`.
#[derive(Default)]
pub struct ProgressBarReporter {
    bar: Option<ProgressBar>,
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for ProgressBarReporter {
    fn begin_epoch(&mut self, epoch: usize, total_epochs: usize, total_steps: usize) {
        if let Some(previous) = self.bar.take() {
            previous.finish_and_clear();
        }
        let bar = ProgressBar::new(total_steps as u64);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(format!("Epoch {epoch}/{total_epochs}"));
        self.bar = Some(bar);
    }

    fn advance(&mut self, phase: Phase, average_loss: f64) {
        if let Some(bar) = &self.bar {
            let label = match phase {
                Phase::Train => "Avg Train Loss",
                Phase::Validation => "Avg Val Loss",
            };
            bar.set_message(format!("{label}: {average_loss:.6} | Phase: {phase}"));
            bar.inc(1);
        }
    }

    fn end_epoch(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}
