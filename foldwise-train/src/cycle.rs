//! Training cycle controller: the epoch loop of one training session.

use crate::config::TrainingConfig;
use crate::data::BatchSource;
use crate::epoch::run_epoch;
use crate::error::TrainError;
use crate::metrics::{MetricCollection, MetricsBundle};
use crate::model::{LossFunction, LrScheduler, Model, Optimizer, TrainingComponents};
use crate::progress::Progress;
use crate::sink::MetricsSink;
use crate::step::StepExecutor;

/// Tag under which the model is checkpointed after the given 1-indexed epoch.
pub fn checkpoint_tag(epoch: usize) -> String {
    format!("model_checkpoint_{epoch}")
}

/// Run `n_epochs` epochs of training and evaluation.
///
/// Per epoch: train, evaluate, merge into one bundle (`train_loss`,
/// `val_loss`, `val_<metric>`), log it to the sink, checkpoint if the epoch is
/// in `config.checkpoints`, then advance the scheduler if there is one.
///
/// Returns the bundle of the final epoch only; earlier epochs are visible
/// through the sink. Errors propagate immediately and leave the sink session
/// for the caller to close.
pub fn run_training_and_evaluation_cycle<M, O, S, L, C, T, V>(
    components: &mut TrainingComponents<M, O, S, L>,
    train_batches: &T,
    val_batches: &V,
    config: &TrainingConfig,
    metrics: &mut C,
    sink: &mut dyn MetricsSink,
    progress: &mut dyn Progress,
) -> Result<MetricsBundle, TrainError>
where
    M: Model,
    O: Optimizer<M>,
    S: LrScheduler<O>,
    L: LossFunction<M>,
    C: MetricCollection<M::Output> + ?Sized,
    T: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
    V: BatchSource<Batch = (M::Input, M::Target)> + ?Sized,
{
    let n_epochs = config.hyperparameters.n_epochs;
    let executor = StepExecutor::new(config.hyperparameters.accumulation_steps)?;
    let total_steps = train_batches.num_batches() + val_batches.num_batches();

    let TrainingComponents {
        model,
        optimizer,
        scheduler,
        loss_fn,
    } = components;

    model.to_device(&config.device)?;
    tracing::info!(
        device = %config.device,
        n_epochs,
        train_batches = train_batches.num_batches(),
        val_batches = val_batches.num_batches(),
        "Starting training cycle"
    );

    let mut last_metrics = MetricsBundle::new();
    for epoch in 1..=n_epochs {
        progress.begin_epoch(epoch, n_epochs, total_steps);
        let outcome = run_epoch(
            &mut *model,
            train_batches,
            val_batches,
            &mut *optimizer,
            &*loss_fn,
            &mut *metrics,
            &executor,
            &mut *progress,
        );
        progress.end_epoch();
        let outcome = outcome?;

        let bundle = outcome.to_bundle()?;
        tracing::info!(epoch, metrics = ?bundle, "Epoch {epoch}/{n_epochs} complete");
        sink.log_metrics(&bundle)?;

        if config.is_checkpoint_epoch(epoch) {
            sink.save_model(&*model, &checkpoint_tag(epoch))?;
            tracing::info!(epoch, "Model checkpoint saved at epoch {epoch}");
        }

        if let Some(scheduler) = scheduler.as_mut() {
            scheduler.step(&mut *optimizer);
        }

        last_metrics = bundle;
    }

    Ok(last_metrics)
}
