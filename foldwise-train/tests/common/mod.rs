//! Test doubles shared by the integration tests.
//!
//! Samples are `(feature, label)` pairs. The model multiplies features by a
//! single weight; every collaborator reports what it was asked to do through a
//! shared [`Probe`].

#![allow(dead_code)]

use foldwise_train::config::Device;
use foldwise_train::metrics::ComputedMetrics;
use foldwise_train::{
    Batcher, LossFunction, LrScheduler, MetricCollection, MetricsBundle, MetricsSink, Mode,
    Model, ModelFactory, ModelState, Optimizer, TrainError, TrainingComponents, TrainingConfig,
};
use std::cell::RefCell;
use std::rc::Rc;

pub type Sample = (f32, u8);
pub type Batch = (Vec<f32>, Vec<u8>);

#[derive(Debug, Default)]
pub struct Counters {
    pub builds: usize,
    pub devices: Vec<Device>,
    pub forward_calls: usize,
    pub backward_calls: usize,
    pub optimizer_steps: usize,
    pub zero_grads: usize,
    pub scheduler_steps: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Probe(Rc<RefCell<Counters>>);

impl Probe {
    pub fn get<T>(&self, f: impl FnOnce(&Counters) -> T) -> T {
        f(&self.0.borrow())
    }

    fn with(&self, f: impl FnOnce(&mut Counters)) {
        f(&mut self.0.borrow_mut());
    }
}

/// `n` samples whose labels cycle through `0..4`.
pub fn dataset(n: usize) -> Vec<Sample> {
    (0..n).map(|i| (i as f32 / n as f32, (i % 4) as u8)).collect()
}

/// Pre-built batches of two samples each.
pub fn batches(n: usize) -> Vec<Batch> {
    (0..n)
        .map(|i| (vec![i as f32, 1.0], vec![(i % 2) as u8, 1]))
        .collect()
}

pub fn config(n_epochs: usize) -> TrainingConfig {
    let mut config = TrainingConfig {
        architecture: "unet".to_string(),
        dataset: "isic".to_string(),
        n_folds: 4,
        random_state: 7,
        ..Default::default()
    };
    config.hyperparameters.n_epochs = n_epochs;
    config.hyperparameters.batch_size = 2;
    config
}

pub struct PairBatcher;

impl Batcher<Sample> for PairBatcher {
    type Batch = Batch;

    fn batch(&self, items: Vec<Sample>) -> Result<Batch, TrainError> {
        Ok(items.into_iter().unzip())
    }
}

pub struct ScaleModel {
    pub weight: f32,
    pub grad: f32,
    /// Forward call (1-based) that fails with a device error.
    pub fail_on_forward: Option<usize>,
    probe: Probe,
    forwards: usize,
}

impl ScaleModel {
    pub fn new(probe: Probe) -> Self {
        Self {
            weight: 1.0,
            grad: 0.0,
            fail_on_forward: None,
            probe,
            forwards: 0,
        }
    }
}

impl ModelState for ScaleModel {
    fn state_bytes(&self) -> Result<Vec<u8>, TrainError> {
        Ok(self.weight.to_le_bytes().to_vec())
    }
}

impl Model for ScaleModel {
    type Input = Vec<f32>;
    type Target = Vec<u8>;
    type Output = Vec<f32>;
    type Loss = f64;

    fn to_device(&mut self, device: &Device) -> Result<(), TrainError> {
        self.probe.with(|c| c.devices.push(*device));
        Ok(())
    }

    fn set_mode(&mut self, _mode: Mode) {}

    fn forward(&mut self, input: &Vec<f32>) -> Result<Vec<f32>, TrainError> {
        self.forwards += 1;
        self.probe.with(|c| c.forward_calls += 1);
        if self.fail_on_forward == Some(self.forwards) {
            return Err(TrainError::device("CUDA out of memory"));
        }
        self.infer(input)
    }

    fn infer(&self, input: &Vec<f32>) -> Result<Vec<f32>, TrainError> {
        Ok(input.iter().map(|x| x * self.weight).collect())
    }

    fn backward(&mut self, loss: f64) -> Result<(), TrainError> {
        self.grad += loss as f32;
        self.probe.with(|c| c.backward_calls += 1);
        Ok(())
    }
}

/// Mean absolute error between outputs and labels.
pub struct AbsError;

impl LossFunction<ScaleModel> for AbsError {
    fn compute(&self, output: &Vec<f32>, target: &Vec<u8>) -> Result<f64, TrainError> {
        if output.len() != target.len() {
            return Err(TrainError::shape_mismatch(format!(
                "{} outputs for {} targets",
                output.len(),
                target.len()
            )));
        }
        let total: f64 = output
            .iter()
            .zip(target)
            .map(|(o, t)| f64::from(*o - f32::from(*t)).abs())
            .sum();
        Ok(total / output.len().max(1) as f64)
    }
}

pub struct CountingSgd {
    pub lr: f32,
    probe: Probe,
}

impl CountingSgd {
    pub fn new(lr: f32, probe: Probe) -> Self {
        Self { lr, probe }
    }
}

impl Optimizer<ScaleModel> for CountingSgd {
    fn step(&mut self, model: &mut ScaleModel) -> Result<(), TrainError> {
        model.weight -= self.lr * model.grad.signum();
        self.probe.with(|c| c.optimizer_steps += 1);
        Ok(())
    }

    fn zero_grad(&mut self, model: &mut ScaleModel) {
        model.grad = 0.0;
        self.probe.with(|c| c.zero_grads += 1);
    }
}

pub struct HalvingScheduler {
    probe: Probe,
}

impl HalvingScheduler {
    pub fn new(probe: Probe) -> Self {
        Self { probe }
    }
}

impl LrScheduler<CountingSgd> for HalvingScheduler {
    fn step(&mut self, optimizer: &mut CountingSgd) {
        optimizer.lr *= 0.5;
        self.probe.with(|c| c.scheduler_steps += 1);
    }
}

/// Reports the mean label seen (`label_mean`) and per-class hit rates
/// (`accuracy`, one value per class).
#[derive(Debug, Default)]
pub struct LabelMetrics {
    pub resets: usize,
    pub updates: usize,
    labels: Vec<i32>,
    hits: [f64; 2],
    seen: [f64; 2],
}

impl MetricCollection<Vec<f32>> for LabelMetrics {
    fn reset(&mut self) {
        self.resets += 1;
        self.labels.clear();
        self.hits = [0.0; 2];
        self.seen = [0.0; 2];
    }

    fn update(&mut self, predictions: &Vec<f32>, targets: &[i32]) -> Result<(), TrainError> {
        self.updates += 1;
        for (p, t) in predictions.iter().zip(targets) {
            let class = usize::from(*t > 0);
            self.seen[class] += 1.0;
            if (p.round() as i32 > 0) == (*t > 0) {
                self.hits[class] += 1.0;
            }
        }
        self.labels.extend_from_slice(targets);
        Ok(())
    }

    fn compute(&self) -> Result<ComputedMetrics, TrainError> {
        let mean = self.labels.iter().map(|&l| f64::from(l)).sum::<f64>()
            / self.labels.len().max(1) as f64;
        let accuracy = self
            .hits
            .iter()
            .zip(&self.seen)
            .map(|(h, s)| if *s > 0.0 { h / s } else { 0.0 })
            .collect();
        Ok([
            ("label_mean".to_string(), vec![mean]),
            ("accuracy".to_string(), accuracy),
        ]
        .into_iter()
        .collect())
    }
}

pub struct MockFactory {
    pub probe: Probe,
    pub with_scheduler: bool,
    /// Build (1-based) whose model fails on its third forward call.
    pub fail_on_build: Option<usize>,
}

impl MockFactory {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            with_scheduler: true,
            fail_on_build: None,
        }
    }
}

impl ModelFactory for MockFactory {
    type Model = ScaleModel;
    type Optimizer = CountingSgd;
    type Scheduler = HalvingScheduler;
    type LossFn = AbsError;

    fn build(
        &self,
        config: &TrainingConfig,
    ) -> Result<TrainingComponents<ScaleModel, CountingSgd, HalvingScheduler, AbsError>, TrainError>
    {
        self.probe.with(|c| c.builds += 1);
        let build = self.probe.get(|c| c.builds);

        let mut model = ScaleModel::new(self.probe.clone());
        if self.fail_on_build == Some(build) {
            model.fail_on_forward = Some(3);
        }
        Ok(TrainingComponents {
            model,
            optimizer: CountingSgd::new(config.hyperparameters.learning_rate as f32, self.probe.clone()),
            scheduler: self
                .with_scheduler
                .then(|| HalvingScheduler::new(self.probe.clone())),
            loss_fn: AbsError,
        })
    }
}

/// Sink that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<String>,
    pub logged: Vec<MetricsBundle>,
    pub saved: Vec<(String, Vec<u8>)>,
    pub fail_finish: bool,
}

impl RecordingSink {
    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.as_str() == event).count()
    }
}

impl MetricsSink for RecordingSink {
    fn init(&mut self, run_name: &str) -> Result<(), TrainError> {
        self.events.push(format!("init:{run_name}"));
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &MetricsBundle) -> Result<(), TrainError> {
        self.events.push("log".to_string());
        self.logged.push(metrics.clone());
        Ok(())
    }

    fn save_model(&mut self, model: &dyn ModelState, tag: &str) -> Result<(), TrainError> {
        self.events.push(format!("save:{tag}"));
        self.saved.push((tag.to_string(), model.state_bytes()?));
        Ok(())
    }

    fn plot_metrics(&mut self) -> Result<(), TrainError> {
        self.events.push("plot".to_string());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        self.events.push("finish".to_string());
        if self.fail_finish {
            return Err(TrainError::sink("tracking server unreachable"));
        }
        Ok(())
    }
}
