//! Training configuration.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> explicit overrides. The resulting [`TrainingConfig`] is
//! read-only for the rest of the run; every component borrows it.

use crate::error::TrainError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Environment variable prefix, e.g. `FOLDWISE_HYPERPARAMETERS__BATCH_SIZE=8`.
pub const ENV_PREFIX: &str = "FOLDWISE_";

/// Compute device the model is moved to before the first epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA device by ordinal.
    Cuda(usize),
    /// Apple Metal.
    Mps,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Device::Mps => write!(f, "mps"),
        }
    }
}

impl FromStr for Device {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(Device::Cuda)
                    .map_err(|_| TrainError::config(format!("invalid CUDA ordinal in '{s}'"))),
                None => Err(TrainError::config(format!("unknown device '{s}'"))),
            },
        }
    }
}

impl TryFrom<String> for Device {
    type Error = TrainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

/// Optimization hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of epochs per training cycle.
    #[serde(default = "default_n_epochs")]
    pub n_epochs: usize,
    /// Samples per batch handed to the model.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches whose gradients are summed before one optimizer update.
    #[serde(default = "default_accumulation_steps")]
    pub accumulation_steps: usize,
    /// Learning rate consumed by the model factory when building the optimizer.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_epochs: default_n_epochs(),
            batch_size: default_batch_size(),
            accumulation_steps: default_accumulation_steps(),
            learning_rate: default_learning_rate(),
        }
    }
}

fn default_n_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    8
}

fn default_accumulation_steps() -> usize {
    1
}

fn default_learning_rate() -> f64 {
    1e-4
}

/// Complete configuration for a training run or a cross-validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Architecture name passed to the model factory (e.g. `unet`).
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Dataset name, used for run naming.
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    /// 1-indexed epochs after which the model is checkpointed.
    #[serde(default)]
    pub checkpoints: BTreeSet<usize>,
    /// Number of folds for k-fold cross-validation.
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    /// Seed for the fold partition.
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: default_architecture(),
            dataset: default_dataset(),
            device: Device::default(),
            hyperparameters: Hyperparameters::default(),
            checkpoints: BTreeSet::new(),
            n_folds: default_n_folds(),
            random_state: default_random_state(),
        }
    }
}

fn default_architecture() -> String {
    "unet".to_string()
}

fn default_dataset() -> String {
    "dataset".to_string()
}

fn default_n_folds() -> usize {
    5
}

fn default_random_state() -> u64 {
    42
}

impl TrainingConfig {
    /// Name of the logging session: `{architecture}_{dataset}`.
    pub fn run_name(&self) -> String {
        format!("{}_{}", self.architecture, self.dataset)
    }

    /// Whether the model is checkpointed after the given 1-indexed epoch.
    pub fn is_checkpoint_epoch(&self, epoch: usize) -> bool {
        self.checkpoints.contains(&epoch)
    }

    /// Reject configurations that would fail mid-run.
    ///
    /// Called at orchestrator entry so a bad value is reported before any
    /// logging session is opened or any fold starts.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.architecture.trim().is_empty() {
            return Err(TrainError::config("architecture must not be empty"));
        }
        if self.dataset.trim().is_empty() {
            return Err(TrainError::config("dataset must not be empty"));
        }

        let hp = &self.hyperparameters;
        if hp.n_epochs == 0 {
            return Err(TrainError::config("hyperparameters.n_epochs must be >= 1"));
        }
        if hp.batch_size == 0 {
            return Err(TrainError::config("hyperparameters.batch_size must be >= 1"));
        }
        if hp.accumulation_steps == 0 {
            return Err(TrainError::config(
                "hyperparameters.accumulation_steps must be >= 1",
            ));
        }
        if !hp.learning_rate.is_finite() || hp.learning_rate <= 0.0 {
            return Err(TrainError::config(format!(
                "hyperparameters.learning_rate must be a positive number, got {}",
                hp.learning_rate
            )));
        }

        if self.checkpoints.contains(&0) {
            return Err(TrainError::config(
                "checkpoints are 1-indexed epoch numbers; 0 is not a valid epoch",
            ));
        }
        let unreachable: Vec<usize> = self
            .checkpoints
            .range(hp.n_epochs + 1..)
            .copied()
            .collect();
        if !unreachable.is_empty() {
            tracing::warn!(
                ?unreachable,
                n_epochs = hp.n_epochs,
                "Checkpoint epochs beyond n_epochs will never be saved"
            );
        }

        Ok(())
    }

    /// [`validate`](Self::validate) plus the checks only k-fold runs need.
    pub fn validate_for_cross_validation(&self, n_samples: usize) -> Result<(), TrainError> {
        self.validate()?;
        if self.n_folds < 2 {
            return Err(TrainError::config(format!(
                "n_folds must be >= 2, got {}",
                self.n_folds
            )));
        }
        if self.n_folds > n_samples {
            return Err(TrainError::config(format!(
                "n_folds ({}) exceeds the number of samples ({n_samples})",
                self.n_folds
            )));
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `FOLDWISE_`, `__` for nesting)
/// 3. The TOML file at `path`, which must exist when given
/// 4. Built-in defaults
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&TrainingConfig>,
) -> Result<TrainingConfig, TrainError> {
    let mut figment = Figment::from(Serialized::defaults(TrainingConfig::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(TrainError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // FOLDWISE_DEVICE, FOLDWISE_HYPERPARAMETERS__N_EPOCHS, etc.
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainingConfig = figment.extract().map_err(Box::new)?;
    tracing::debug!(run = %config.run_name(), device = %config.device, "Loaded training config");
    Ok(config)
}
