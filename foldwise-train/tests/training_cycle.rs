//! Integration tests for the epoch loop driven directly over prepared batches.

mod common;

use common::*;
use foldwise_train::config::Device;
use foldwise_train::progress::{Phase, Progress};
use foldwise_train::{
    NoProgress, NoScheduler, TrainError, TrainingComponents, run_training_and_evaluation_cycle,
};
use pretty_assertions::assert_eq;

fn components(probe: &Probe) -> TrainingComponents<ScaleModel, CountingSgd, HalvingScheduler, AbsError> {
    TrainingComponents {
        model: ScaleModel::new(probe.clone()),
        optimizer: CountingSgd::new(0.1, probe.clone()),
        scheduler: Some(HalvingScheduler::new(probe.clone())),
        loss_fn: AbsError,
    }
}

#[test]
fn test_checkpoints_only_at_configured_epochs() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut config = config(4);
    config.checkpoints = [2, 4].into_iter().collect();
    let mut metrics = LabelMetrics::default();
    let mut sink = RecordingSink::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(3),
        &batches(2),
        &config,
        &mut metrics,
        &mut sink,
        &mut NoProgress,
    )
    .unwrap();

    let tags: Vec<&str> = sink.saved.iter().map(|(tag, _)| tag.as_str()).collect();
    assert_eq!(tags, vec!["model_checkpoint_2", "model_checkpoint_4"]);
    assert_eq!(
        sink.events,
        vec![
            "log",
            "log",
            "save:model_checkpoint_2",
            "log",
            "log",
            "save:model_checkpoint_4"
        ]
    );
    assert_eq!(sink.saved[1].1, parts.model.weight.to_le_bytes().to_vec());
}

#[test]
fn test_returns_last_epoch_bundle_only() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut metrics = LabelMetrics::default();
    let mut sink = RecordingSink::default();

    let last = run_training_and_evaluation_cycle(
        &mut parts,
        &batches(4),
        &batches(2),
        &config(3),
        &mut metrics,
        &mut sink,
        &mut NoProgress,
    )
    .unwrap();

    let keys: Vec<&str> = last.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["train_loss", "val_accuracy", "val_label_mean", "val_loss"]
    );
    assert_eq!(sink.logged.len(), 3);
    assert_eq!(&last, sink.logged.last().unwrap());
    // Labels of the validation batches: [0, 1] and [1, 1].
    assert!((last["val_label_mean"] - 0.75).abs() < 1e-12);
}

#[test]
fn test_scheduler_steps_once_per_epoch() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut metrics = LabelMetrics::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(2),
        &batches(1),
        &config(5),
        &mut metrics,
        &mut RecordingSink::default(),
        &mut NoProgress,
    )
    .unwrap();

    assert_eq!(probe.get(|c| c.scheduler_steps), 5);
    assert!((parts.optimizer.lr - 0.1 / 32.0).abs() < 1e-6);
}

#[test]
fn test_runs_without_scheduler() {
    let probe = Probe::default();
    let mut parts: TrainingComponents<_, _, NoScheduler, _> = TrainingComponents {
        model: ScaleModel::new(probe.clone()),
        optimizer: CountingSgd::new(0.1, probe.clone()),
        scheduler: None,
        loss_fn: AbsError,
    };
    let mut metrics = LabelMetrics::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(2),
        &batches(1),
        &config(2),
        &mut metrics,
        &mut RecordingSink::default(),
        &mut NoProgress,
    )
    .unwrap();

    assert_eq!(parts.optimizer.lr, 0.1);
    assert_eq!(probe.get(|c| c.optimizer_steps), 4);
}

#[test]
fn test_metrics_reset_before_every_evaluation() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut metrics = LabelMetrics::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(2),
        &batches(3),
        &config(4),
        &mut metrics,
        &mut RecordingSink::default(),
        &mut NoProgress,
    )
    .unwrap();

    assert_eq!(metrics.resets, 4);
    assert_eq!(metrics.updates, 12);
}

#[test]
fn test_accumulation_controls_update_count() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut config = config(2);
    config.hyperparameters.accumulation_steps = 3;
    let mut metrics = LabelMetrics::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(10),
        &batches(1),
        &config,
        &mut metrics,
        &mut RecordingSink::default(),
        &mut NoProgress,
    )
    .unwrap();

    // Updates after batches 3, 6 and 9; the trailing batch is never applied.
    assert_eq!(probe.get(|c| c.optimizer_steps), 6);
    // One clear per epoch start plus one per update.
    assert_eq!(probe.get(|c| c.zero_grads), 8);
    assert_eq!(probe.get(|c| c.backward_calls), 20);
}

#[test]
fn test_model_moved_to_device_once() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut config = config(3);
    config.device = Device::Cuda(1);
    let mut metrics = LabelMetrics::default();

    run_training_and_evaluation_cycle(
        &mut parts,
        &batches(1),
        &batches(1),
        &config,
        &mut metrics,
        &mut RecordingSink::default(),
        &mut NoProgress,
    )
    .unwrap();

    assert_eq!(probe.get(|c| c.devices.clone()), vec![Device::Cuda(1)]);
}

#[test]
fn test_model_error_stops_the_cycle() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    parts.model.fail_on_forward = Some(3);
    let mut config = config(3);
    config.checkpoints = [1, 2, 3].into_iter().collect();
    let mut metrics = LabelMetrics::default();
    let mut sink = RecordingSink::default();

    let err = run_training_and_evaluation_cycle(
        &mut parts,
        &batches(2),
        &batches(1),
        &config,
        &mut metrics,
        &mut sink,
        &mut NoProgress,
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Device(_)));
    // Epoch 1 completed; epoch 2 failed on its first batch.
    assert_eq!(sink.events, vec!["log", "save:model_checkpoint_1"]);
    assert_eq!(probe.get(|c| c.scheduler_steps), 1);
}

#[derive(Default)]
struct EpochLog {
    begun: Vec<usize>,
    ended: usize,
}

impl Progress for EpochLog {
    fn begin_epoch(&mut self, epoch: usize, _total_epochs: usize, _total_steps: usize) {
        self.begun.push(epoch);
    }

    fn advance(&mut self, _phase: Phase, _average_loss: f64) {}

    fn end_epoch(&mut self) {
        self.ended += 1;
    }
}

#[test]
fn test_failed_epoch_still_ends_progress() {
    let probe = Probe::default();
    let mut parts = components(&probe);
    parts.model.fail_on_forward = Some(3);
    let mut metrics = LabelMetrics::default();
    let mut progress = EpochLog::default();

    let err = run_training_and_evaluation_cycle(
        &mut parts,
        &batches(2),
        &batches(1),
        &config(3),
        &mut metrics,
        &mut RecordingSink::default(),
        &mut progress,
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Device(_)));
    assert_eq!(progress.begun, vec![1, 2]);
    assert_eq!(progress.ended, 2);
}

#[test]
fn test_loss_named_metric_is_rejected() {
    struct LossMetric;

    impl foldwise_train::MetricCollection<Vec<f32>> for LossMetric {
        fn reset(&mut self) {}

        fn update(&mut self, _predictions: &Vec<f32>, _targets: &[i32]) -> Result<(), TrainError> {
            Ok(())
        }

        fn compute(&self) -> Result<foldwise_train::metrics::ComputedMetrics, TrainError> {
            Ok([("loss".to_string(), vec![0.0])].into_iter().collect())
        }
    }

    let probe = Probe::default();
    let mut parts = components(&probe);
    let mut sink = RecordingSink::default();
    let err = run_training_and_evaluation_cycle(
        &mut parts,
        &batches(1),
        &batches(1),
        &config(1),
        &mut LossMetric,
        &mut sink,
        &mut NoProgress,
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Metrics(_)));
    assert!(sink.logged.is_empty());
}
