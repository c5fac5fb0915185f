//! Batch step executor: one forward/backward/update cycle.

use crate::error::TrainError;
use crate::model::{Loss, LossFunction, Model, Optimizer};

/// Result of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Scalar loss of the batch.
    pub loss: f64,
    /// Whether the optimizer applied an update after this batch.
    pub updated: bool,
}

/// Runs training steps with gradient accumulation.
///
/// Gradients from `accumulation_steps` consecutive batches are summed before
/// a single optimizer update, emulating a batch `accumulation_steps` times
/// larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepExecutor {
    accumulation_steps: usize,
}

impl StepExecutor {
    pub fn new(accumulation_steps: usize) -> Result<Self, TrainError> {
        if accumulation_steps == 0 {
            return Err(TrainError::config("accumulation_steps must be >= 1"));
        }
        Ok(Self { accumulation_steps })
    }

    pub fn accumulation_steps(&self) -> usize {
        self.accumulation_steps
    }

    /// Whether the batch at zero-based `batch_index` closes an accumulation
    /// window.
    pub fn is_update_step(&self, batch_index: usize) -> bool {
        (batch_index + 1) % self.accumulation_steps == 0
    }

    /// Forward, loss, backward; then update and clear gradients if the batch
    /// closes an accumulation window.
    pub fn run<M, O, L>(
        &self,
        model: &mut M,
        input: &M::Input,
        target: &M::Target,
        optimizer: &mut O,
        loss_fn: &L,
        batch_index: usize,
    ) -> Result<StepOutcome, TrainError>
    where
        M: Model,
        O: Optimizer<M>,
        L: LossFunction<M>,
    {
        let output = model.forward(input)?;
        let loss = loss_fn.compute(&output, target)?;
        let value = loss.item();
        model.backward(loss)?;

        let updated = self.is_update_step(batch_index);
        if updated {
            optimizer.step(model)?;
            optimizer.zero_grad(model);
        }

        Ok(StepOutcome {
            loss: value,
            updated,
        })
    }
}
