//! Cross-validation orchestrator.
//!
//! [`Trainer`] ties a config, a model factory, a batcher, a metric collection
//! and a sink together. `train_model` runs one logged training session on a
//! fixed train/validation split; `cross_validate` repeats it once per fold.

use crate::average::KeyedAverage;
use crate::config::TrainingConfig;
use crate::cycle::run_training_and_evaluation_cycle;
use crate::data::{Batcher, DataLoader, Dataset, Subset};
use crate::error::TrainError;
use crate::folds::KFold;
use crate::metrics::{MetricCollection, MetricsBundle};
use crate::model::{Model, ModelFactory};
use crate::progress::{Progress, ProgressBarReporter};
use crate::sink::{LoggingSession, MetricsSink};
use serde::{Deserialize, Serialize};

/// Input type of the model a factory builds.
pub type FactoryInput<F> = <<F as ModelFactory>::Model as Model>::Input;
/// Target type of the model a factory builds.
pub type FactoryTarget<F> = <<F as ModelFactory>::Model as Model>::Target;
/// Output type of the model a factory builds.
pub type FactoryOutput<F> = <<F as ModelFactory>::Model as Model>::Output;

/// Per-metric statistics over the folds of one cross-validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub metric_name: String,
}

impl CrossValidationResult {
    /// Mean and population standard deviation of `scores`.
    pub fn from_scores(scores: Vec<f64>, metric_name: &str) -> Self {
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            fold_scores: scores,
            mean_score: mean,
            std_score: variance.sqrt(),
            metric_name: metric_name.to_string(),
        }
    }
}

/// Outcome of [`Trainer::cross_validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationReport {
    /// Final-epoch bundle of each fold, in fold order.
    #[serde(with = "crate::metrics::nan_as_null::vec")]
    pub fold_metrics: Vec<MetricsBundle>,
    /// Per-key mean over the folds that reported the key.
    #[serde(with = "crate::metrics::nan_as_null")]
    pub averaged: MetricsBundle,
}

impl CrossValidationReport {
    pub fn n_folds(&self) -> usize {
        self.fold_metrics.len()
    }

    /// Statistics for one metric, or `None` if no fold reported it.
    pub fn summary(&self, metric: &str) -> Option<CrossValidationResult> {
        let scores: Vec<f64> = self
            .fold_metrics
            .iter()
            .filter_map(|fold| fold.get(metric).copied())
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(CrossValidationResult::from_scores(scores, metric))
    }
}

/// Runs training sessions and k-fold cross-validation.
///
/// The sink is reused across folds; each fold opens and closes its own
/// session on it. The factory is asked for fresh components per session so
/// no state carries from one fold into the next.
pub struct Trainer<F, B, C, S> {
    config: TrainingConfig,
    factory: F,
    batcher: B,
    metrics: C,
    sink: S,
    progress: Box<dyn Progress>,
}

impl<F, B, C, S> Trainer<F, B, C, S>
where
    F: ModelFactory,
    C: MetricCollection<FactoryOutput<F>>,
    S: MetricsSink,
{
    pub fn new(config: TrainingConfig, factory: F, batcher: B, metrics: C, sink: S) -> Self {
        Self {
            config,
            factory,
            batcher,
            metrics,
            sink,
            progress: Box::new(ProgressBarReporter::new()),
        }
    }

    /// Replace the terminal progress bar.
    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn metrics(&self) -> &C {
        &self.metrics
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// One logged training session on a fixed split.
    ///
    /// The sink's `plot_metrics` and `finish` run exactly once however the
    /// session ends. If both training and finalization fail, the training
    /// error is returned.
    pub fn train_model<DT, DV>(&mut self, train: &DT, val: &DV) -> Result<MetricsBundle, TrainError>
    where
        DT: Dataset + ?Sized,
        DV: Dataset<Item = DT::Item> + ?Sized,
        B: Batcher<DT::Item, Batch = (FactoryInput<F>, FactoryTarget<F>)>,
    {
        self.config.validate()?;
        self.run_session(train, val)
    }

    /// K-fold cross-validation over `dataset`.
    ///
    /// Folds run sequentially; the first failing fold aborts the run.
    pub fn cross_validate<D>(&mut self, dataset: &D) -> Result<CrossValidationReport, TrainError>
    where
        D: Dataset + ?Sized,
        B: Batcher<D::Item, Batch = (FactoryInput<F>, FactoryTarget<F>)>,
    {
        self.config.validate_for_cross_validation(dataset.len())?;
        let kfold = KFold::new(self.config.n_folds, self.config.random_state)?;
        let splits = kfold.split(dataset.len())?;

        let mut averaged = KeyedAverage::new();
        let mut fold_metrics = Vec::with_capacity(splits.len());
        for split in splits {
            let _span = tracing::info_span!("fold", fold = split.fold).entered();
            tracing::info!(
                fold = split.fold,
                train_samples = split.train.len(),
                val_samples = split.validation.len(),
                "Fold {}",
                split.fold
            );

            let train = Subset::new(dataset, split.train)?;
            let val = Subset::new(dataset, split.validation)?;
            let metrics = self.run_session(&train, &val)?;

            averaged.update_all(&metrics);
            fold_metrics.push(metrics);
        }

        let report = CrossValidationReport {
            fold_metrics,
            averaged: averaged.to_bundle(),
        };
        tracing::info!(
            folds = report.n_folds(),
            metrics = ?report.averaged,
            "Cross-validation complete"
        );
        Ok(report)
    }

    /// Cross-validate and return only the fold-averaged metrics.
    pub fn k_fold_cross_validation<D>(&mut self, dataset: &D) -> Result<MetricsBundle, TrainError>
    where
        D: Dataset + ?Sized,
        B: Batcher<D::Item, Batch = (FactoryInput<F>, FactoryTarget<F>)>,
    {
        Ok(self.cross_validate(dataset)?.averaged)
    }

    fn run_session<DT, DV>(&mut self, train: &DT, val: &DV) -> Result<MetricsBundle, TrainError>
    where
        DT: Dataset + ?Sized,
        DV: Dataset<Item = DT::Item> + ?Sized,
        B: Batcher<DT::Item, Batch = (FactoryInput<F>, FactoryTarget<F>)>,
    {
        let mut session = LoggingSession::new(&mut self.sink);
        let trained = train_in_session(
            &self.config,
            &self.factory,
            &self.batcher,
            &mut self.metrics,
            session.sink(),
            self.progress.as_mut(),
            train,
            val,
        );
        let closed = session.close();

        let metrics = trained?;
        closed?;
        Ok(metrics)
    }
}

#[allow(clippy::too_many_arguments)]
fn train_in_session<F, B, C, DT, DV>(
    config: &TrainingConfig,
    factory: &F,
    batcher: &B,
    metrics: &mut C,
    sink: &mut dyn MetricsSink,
    progress: &mut dyn Progress,
    train: &DT,
    val: &DV,
) -> Result<MetricsBundle, TrainError>
where
    F: ModelFactory,
    C: MetricCollection<FactoryOutput<F>>,
    DT: Dataset + ?Sized,
    DV: Dataset<Item = DT::Item> + ?Sized,
    B: Batcher<DT::Item, Batch = (FactoryInput<F>, FactoryTarget<F>)>,
{
    let run_name = config.run_name();
    sink.init(&run_name)?;
    tracing::info!(
        run = %run_name,
        train_samples = train.len(),
        val_samples = val.len(),
        "Training session started"
    );

    let batch_size = config.hyperparameters.batch_size;
    let train_loader = DataLoader::new(train, batcher, batch_size)?;
    let val_loader = DataLoader::new(val, batcher, batch_size)?;

    let mut components = factory.build(config)?;
    run_training_and_evaluation_cycle(
        &mut components,
        &train_loader,
        &val_loader,
        config,
        metrics,
        sink,
        progress,
    )
}
