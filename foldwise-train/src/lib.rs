//! # foldwise-train: supervised training loops and k-fold cross-validation
//!
//! The crate drives a model through epochs of training and evaluation with
//! gradient accumulation, reports per-epoch metrics and checkpoints to a
//! pluggable sink, and repeats the whole cycle over the folds of a seeded
//! k-fold split.
//!
//! Tensors, devices and backpropagation stay behind the traits in [`model`];
//! this crate owns the loop, the bookkeeping and the session lifecycle.
//!
//! ## Layers
//!
//! 1. **Step**: forward, loss, backward, and an optimizer update
//!    every `accumulation_steps` batches ([`step`])
//! 2. **Epoch**: a training pass, then an evaluation pass ([`epoch`])
//! 3. **Cycle**: `n_epochs` epochs with logging, checkpoints and scheduler
//!    steps ([`cycle`])
//! 4. **Orchestrator**: logging sessions and k-fold cross-validation
//!    ([`trainer`])

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Collaborators
pub mod data;
pub mod metrics;
pub mod model;
pub mod progress;
pub mod sink;

// Training loop
pub mod average;
pub mod checkpoint;
pub mod cycle;
pub mod epoch;
pub mod step;

// Cross-validation
pub mod folds;
pub mod trainer;

// Re-exports
pub use config::{Device, Hyperparameters, TrainingConfig, load_config};
pub use cycle::run_training_and_evaluation_cycle;
pub use data::{BatchSource, Batcher, DataLoader, Dataset, Subset};
pub use error::TrainError;
pub use folds::{FoldSplit, KFold};
pub use metrics::{MetricCollection, MetricsBundle};
pub use model::{
    ClassLabels, Loss, LossFunction, LrScheduler, Mode, Model, ModelFactory, ModelState,
    NoScheduler, Optimizer, TrainingComponents,
};
pub use progress::{NoProgress, Progress, ProgressBarReporter};
pub use sink::{ConsoleSink, FileSink, LoggingSession, MetricsSink};
pub use trainer::{CrossValidationReport, CrossValidationResult, Trainer};
