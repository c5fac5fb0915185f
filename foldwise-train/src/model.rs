//! Model-side collaborator traits.
//!
//! The training loop never touches tensors directly. A model, its optimizer,
//! an optional learning-rate scheduler and a loss function are produced by a
//! [`ModelFactory`] and driven through the traits below. Backpropagation,
//! parameter storage and device placement are entirely the implementor's
//! concern.

use crate::config::{Device, TrainingConfig};
use crate::error::TrainError;

/// Whether layers like dropout and batch norm behave in training or
/// inference fashion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A scalar loss that still carries whatever the model needs to backpropagate.
pub trait Loss {
    /// The loss as a plain number, detached from any gradient record.
    fn item(&self) -> f64;
}

impl Loss for f64 {
    fn item(&self) -> f64 {
        *self
    }
}

impl Loss for f32 {
    fn item(&self) -> f64 {
        f64::from(*self)
    }
}

/// Serialized parameters, used when a sink checkpoints the model.
pub trait ModelState {
    fn state_bytes(&self) -> Result<Vec<u8>, TrainError>;
}

/// Targets that can be cast to integer class indices for metric updates.
pub trait ClassLabels {
    fn class_indices(&self) -> Vec<i32>;
}

macro_rules! impl_class_labels {
    ($($t:ty),*) => {
        $(
            impl ClassLabels for [$t] {
                fn class_indices(&self) -> Vec<i32> {
                    self.iter().map(|&v| v as i32).collect()
                }
            }

            impl ClassLabels for Vec<$t> {
                fn class_indices(&self) -> Vec<i32> {
                    self.as_slice().class_indices()
                }
            }
        )*
    };
}

impl_class_labels!(f32, f64, i32, i64, u8, u32, usize);

/// A trainable model.
///
/// `forward` takes `&mut self` because it may record what `backward` needs;
/// `infer` takes `&self` and records nothing, which is how the evaluation pass
/// runs without gradient tracking.
pub trait Model: ModelState {
    type Input;
    type Target: ClassLabels;
    type Output;
    type Loss: Loss;

    fn to_device(&mut self, device: &Device) -> Result<(), TrainError>;

    fn set_mode(&mut self, mode: Mode);

    fn forward(&mut self, input: &Self::Input) -> Result<Self::Output, TrainError>;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, TrainError>;

    /// Accumulate gradients of `loss` into the parameters.
    fn backward(&mut self, loss: Self::Loss) -> Result<(), TrainError>;
}

/// Loss criterion comparing model output to targets.
pub trait LossFunction<M: Model> {
    fn compute(&self, output: &M::Output, target: &M::Target) -> Result<M::Loss, TrainError>;
}

/// Parameter update rule over accumulated gradients.
pub trait Optimizer<M> {
    /// Apply accumulated gradients to the model parameters.
    fn step(&mut self, model: &mut M) -> Result<(), TrainError>;

    /// Clear accumulated gradients.
    fn zero_grad(&mut self, model: &mut M);
}

/// Learning-rate schedule advanced once per epoch.
pub trait LrScheduler<O> {
    fn step(&mut self, optimizer: &mut O);
}

/// Scheduler type for factories that never configure one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScheduler;

impl<O> LrScheduler<O> for NoScheduler {
    fn step(&mut self, _optimizer: &mut O) {}
}

/// Everything one training cycle mutates, built fresh per fold.
pub struct TrainingComponents<M, O, S, L> {
    pub model: M,
    pub optimizer: O,
    pub scheduler: Option<S>,
    pub loss_fn: L,
}

/// Builds the model, optimizer, scheduler and loss function from the config.
///
/// Must be deterministic for a given config apart from parameter
/// initialization, which is the factory's own concern.
pub trait ModelFactory {
    type Model: Model;
    type Optimizer: Optimizer<Self::Model>;
    type Scheduler: LrScheduler<Self::Optimizer>;
    type LossFn: LossFunction<Self::Model>;

    #[allow(clippy::type_complexity)]
    fn build(
        &self,
        config: &TrainingConfig,
    ) -> Result<
        TrainingComponents<Self::Model, Self::Optimizer, Self::Scheduler, Self::LossFn>,
        TrainError,
    >;
}
