//! Incremental means for batch losses and fold metrics.

use crate::metrics::MetricsBundle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar mean updated as `avg += (value - avg) / count`.
///
/// After `n` updates the value is the arithmetic mean of the `n` inputs; the
/// update order only changes floating-point rounding. An average that has not
/// seen any value reads `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningAverage {
    value: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `sample` into the mean and return the new mean.
    pub fn update(&mut self, sample: f64) -> f64 {
        self.count += 1;
        self.value += (sample - self.value) / self.count as f64;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One [`RunningAverage`] per metric name.
///
/// A name seen for the first time starts its own average, so bundles do not
/// have to declare their keys up front and a key missing from some bundles is
/// averaged over the bundles that carried it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyedAverage {
    averages: BTreeMap<String, RunningAverage>,
}

impl KeyedAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, name: &str, sample: f64) -> f64 {
        self.averages
            .entry(name.to_string())
            .or_default()
            .update(sample)
    }

    /// Fold every entry of `bundle` into its average.
    pub fn update_all(&mut self, bundle: &MetricsBundle) {
        for (name, value) in bundle {
            self.update(name, *value);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.averages.get(name).map(RunningAverage::value)
    }

    pub fn len(&self) -> usize {
        self.averages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }

    /// Snapshot of the current means.
    pub fn to_bundle(&self) -> MetricsBundle {
        self.averages
            .iter()
            .map(|(name, avg)| (name.clone(), avg.value()))
            .collect()
    }
}
