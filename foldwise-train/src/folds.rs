//! Seeded k-fold partitioning of sample indices.

use crate::error::TrainError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Train/validation indices for one fold. Both lists are sorted and disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    pub fold: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffled k-fold splitter.
///
/// Indices `0..n` are shuffled with a generator seeded from `seed` and cut
/// into `n_splits` contiguous chunks; the first `n % n_splits` chunks hold one
/// extra sample. Fold `i` validates on chunk `i` and trains on the rest. The
/// same seed and `n` always produce the same folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    seed: u64,
}

impl KFold {
    pub fn new(n_splits: usize, seed: u64) -> Result<Self, TrainError> {
        if n_splits < 2 {
            return Err(TrainError::config(format!(
                "k-fold needs at least 2 splits, got {n_splits}"
            )));
        }
        Ok(Self { n_splits, seed })
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Validation chunk sizes, in fold order.
    pub fn fold_sizes(&self, n_samples: usize) -> Vec<usize> {
        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;
        (0..self.n_splits)
            .map(|i| base + usize::from(i < extra))
            .collect()
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<FoldSplit>, TrainError> {
        if n_samples < self.n_splits {
            return Err(TrainError::config(format!(
                "cannot split {n_samples} samples into {} folds",
                self.n_splits
            )));
        }

        let mut order: Vec<usize> = (0..n_samples).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);

        let mut splits = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for (fold, size) in self.fold_sizes(n_samples).into_iter().enumerate() {
            let end = start + size;
            let mut validation = order[start..end].to_vec();
            let mut train: Vec<usize> = order[..start]
                .iter()
                .chain(&order[end..])
                .copied()
                .collect();
            validation.sort_unstable();
            train.sort_unstable();
            splits.push(FoldSplit {
                fold,
                train,
                validation,
            });
            start = end;
        }
        Ok(splits)
    }
}
