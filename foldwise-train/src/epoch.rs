//! Epoch runner: a full training pass followed by a full evaluation pass.

use crate::average::RunningAverage;
use crate::data::BatchSource;
use crate::error::TrainError;
use crate::metrics::{
    MetricCollection, MetricsBundle, TRAIN_LOSS_KEY, VAL_PREFIX, reduce_metrics,
};
use crate::model::{ClassLabels, Loss, LossFunction, Mode, Model, Optimizer};
use crate::progress::{Phase, Progress};
use crate::step::StepExecutor;
use serde::{Deserialize, Serialize};

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Running average of the per-batch validation loss.
    #[serde(with = "crate::metrics::nan_as_null::scalar")]
    pub loss: f64,
    /// Every computed metric reduced to a scalar.
    #[serde(with = "crate::metrics::nan_as_null")]
    pub metrics: MetricsBundle,
}

/// Outcome of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochOutcome {
    #[serde(with = "crate::metrics::nan_as_null::scalar")]
    pub train_loss: f64,
    pub eval: EvalReport,
}

impl EpochOutcome {
    /// Flatten into the logged bundle: `train_loss`, `val_loss` and
    /// `val_<metric>` for every metric.
    ///
    /// A metric named `loss` would shadow the validation loss and is rejected.
    pub fn to_bundle(&self) -> Result<MetricsBundle, TrainError> {
        let val_loss_key = format!("{VAL_PREFIX}loss");
        let mut bundle = MetricsBundle::new();
        bundle.insert(val_loss_key.clone(), self.eval.loss);
        for (name, value) in &self.eval.metrics {
            let key = format!("{VAL_PREFIX}{name}");
            if key == val_loss_key {
                return Err(TrainError::metrics(format!(
                    "metric '{name}' collides with the validation loss key '{val_loss_key}'"
                )));
            }
            bundle.insert(key, *value);
        }
        bundle.insert(TRAIN_LOSS_KEY.to_string(), self.train_loss);
        Ok(bundle)
    }
}

/// Training sub-phase: every batch through the step executor.
///
/// Gradients are cleared once before the first batch. Returns the running
/// average of the batch losses (`0.0` when there are no batches).
pub fn train_epoch<M, O, L, S>(
    model: &mut M,
    batches: &S,
    optimizer: &mut O,
    loss_fn: &L,
    executor: &StepExecutor,
    progress: &mut dyn Progress,
) -> Result<f64, TrainError>
where
    M: Model,
    O: Optimizer<M>,
    L: LossFunction<M>,
    S: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
{
    model.set_mode(Mode::Train);
    optimizer.zero_grad(model);

    let mut loss = RunningAverage::new();
    let mut updates = 0usize;
    for (batch_index, batch) in batches.batches().enumerate() {
        let (input, target) = batch?;
        let outcome = executor.run(model, &input, &target, optimizer, loss_fn, batch_index)?;
        loss.update(outcome.loss);
        if outcome.updated {
            updates += 1;
        }
        progress.advance(Phase::Train, loss.value());
    }

    tracing::debug!(
        batches = loss.count(),
        updates,
        train_loss = loss.value(),
        "Training pass complete"
    );
    Ok(loss.value())
}

/// Evaluation sub-phase: inference over every batch, then one metric compute.
///
/// The metric collection is reset first so nothing leaks from an earlier
/// pass. Labels are cast to class indices before they reach the metrics.
pub fn evaluate<M, L, C, S>(
    model: &mut M,
    batches: &S,
    loss_fn: &L,
    metrics: &mut C,
    progress: &mut dyn Progress,
) -> Result<EvalReport, TrainError>
where
    M: Model,
    L: LossFunction<M>,
    C: MetricCollection<M::Output> + ?Sized,
    S: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
{
    model.set_mode(Mode::Eval);
    metrics.reset();

    let model: &M = model;
    let mut loss = RunningAverage::new();
    for batch in batches.batches() {
        let (input, target) = batch?;
        let output = model.infer(&input)?;
        let batch_loss = loss_fn.compute(&output, &target)?.item();
        loss.update(batch_loss);
        metrics.update(&output, &target.class_indices())?;
        progress.advance(Phase::Validation, loss.value());
    }

    let reduced = reduce_metrics(metrics.compute()?);
    tracing::debug!(
        batches = loss.count(),
        val_loss = loss.value(),
        metrics = reduced.len(),
        "Evaluation pass complete"
    );
    Ok(EvalReport {
        loss: loss.value(),
        metrics: reduced,
    })
}

/// Train, then evaluate. The evaluation pass never starts before the
/// training pass has consumed every batch.
#[allow(clippy::too_many_arguments)]
pub fn run_epoch<M, O, L, C, T, V>(
    model: &mut M,
    train_batches: &T,
    val_batches: &V,
    optimizer: &mut O,
    loss_fn: &L,
    metrics: &mut C,
    executor: &StepExecutor,
    progress: &mut dyn Progress,
) -> Result<EpochOutcome, TrainError>
where
    M: Model,
    O: Optimizer<M>,
    L: LossFunction<M>,
    C: MetricCollection<M::Output> + ?Sized,
    T: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
    V: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
{
    let train_loss = train_epoch(model, train_batches, optimizer, loss_fn, executor, progress)?;
    let eval = evaluate(model, val_batches, loss_fn, metrics, progress)?;
    Ok(EpochOutcome { train_loss, eval })
}
