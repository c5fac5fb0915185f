//! Metric bundles, the metric-collection seam and per-run metric history.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric name to scalar value. Ordered so logs and CSV columns are stable.
pub type MetricsBundle = BTreeMap<String, f64>;

/// Raw output of [`MetricCollection::compute`]: each metric may keep a
/// residual per-sample (or per-class) dimension.
pub type ComputedMetrics = BTreeMap<String, Vec<f64>>;

/// Key under which the training loss of an epoch is reported.
pub const TRAIN_LOSS_KEY: &str = "train_loss";

/// Prefix applied to every validation entry, including the validation loss.
pub const VAL_PREFIX: &str = "val_";

/// Stateful metric computation over one evaluation pass.
///
/// The evaluation loop calls `reset`, then `update` once per validation batch,
/// then `compute` once at the end. Targets arrive already cast to class
/// indices.
pub trait MetricCollection<P> {
    fn reset(&mut self);

    fn update(&mut self, predictions: &P, targets: &[i32]) -> Result<(), TrainError>;

    fn compute(&self) -> Result<ComputedMetrics, TrainError>;
}

impl<P, C: MetricCollection<P> + ?Sized> MetricCollection<P> for &mut C {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn update(&mut self, predictions: &P, targets: &[i32]) -> Result<(), TrainError> {
        (**self).update(predictions, targets)
    }

    fn compute(&self) -> Result<ComputedMetrics, TrainError> {
        (**self).compute()
    }
}

/// Mean over a metric's residual dimension. An empty residual is NaN.
pub fn reduce_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Collapse every computed metric to one scalar.
pub fn reduce_metrics(computed: ComputedMetrics) -> MetricsBundle {
    computed
        .into_iter()
        .map(|(name, values)| {
            let scalar = reduce_mean(&values);
            (name, scalar)
        })
        .collect()
}

/// Serde adapters for metric values on disk.
///
/// JSON has no NaN or infinity, so non-finite values are written as `null`
/// and `null` reads back as NaN. Use with `#[serde(with = "...")]` on a
/// [`MetricsBundle`] field, or one of the submodules for other shapes.
pub mod nan_as_null {
    use super::MetricsBundle;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    fn to_wire(value: f64) -> Option<f64> {
        value.is_finite().then_some(value)
    }

    fn from_wire(value: Option<f64>) -> f64 {
        value.unwrap_or(f64::NAN)
    }

    pub fn serialize<S: Serializer>(bundle: &MetricsBundle, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(bundle.iter().map(|(name, value)| (name, to_wire(*value))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MetricsBundle, D::Error> {
        let raw = BTreeMap::<String, Option<f64>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(name, value)| (name, from_wire(value)))
            .collect())
    }

    struct Written<'a>(&'a MetricsBundle);

    impl Serialize for Written<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serialize(self.0, serializer)
        }
    }

    struct Loaded(MetricsBundle);

    impl<'de> Deserialize<'de> for Loaded {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserialize(deserializer).map(Loaded)
        }
    }

    /// For `Vec<MetricsBundle>` fields.
    pub mod vec {
        use super::{MetricsBundle, Loaded, Written};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bundles: &[MetricsBundle],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(bundles.iter().map(Written))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<MetricsBundle>, D::Error> {
            let raw = Vec::<Loaded>::deserialize(deserializer)?;
            Ok(raw.into_iter().map(|Loaded(bundle)| bundle).collect())
        }
    }

    /// For `Option<MetricsBundle>` fields.
    pub mod option {
        use super::{MetricsBundle, Loaded, Written};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bundle: &Option<MetricsBundle>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bundle {
                Some(bundle) => serializer.serialize_some(&Written(bundle)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<MetricsBundle>, D::Error> {
            let raw = Option::<Loaded>::deserialize(deserializer)?;
            Ok(raw.map(|Loaded(bundle)| bundle))
        }
    }

    /// For single `f64` fields such as losses.
    pub mod scalar {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
            super::to_wire(*value).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
            Option::<f64>::deserialize(deserializer).map(super::from_wire)
        }
    }
}

/// Quote a CSV field if it contains a comma, a quote or a newline.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Every logged bundle of one session, in order.
///
/// Sinks keep this to render summaries and export the history once the
/// session ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    #[serde(with = "nan_as_null::vec")]
    pub entries: Vec<MetricsBundle>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bundle: MetricsBundle) {
        self.entries.push(bundle);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All metric names seen in any entry.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .flat_map(|bundle| bundle.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Values of one metric in logging order; `None` where an entry lacks it.
    pub fn series(&self, name: &str) -> Vec<Option<f64>> {
        self.entries
            .iter()
            .map(|bundle| bundle.get(name).copied())
            .collect()
    }

    /// `(minimum, maximum, last)` of a metric, ignoring gaps and NaN.
    pub fn summary(&self, name: &str) -> Option<(f64, f64, f64)> {
        let values: Vec<f64> = self
            .series(name)
            .into_iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .collect();
        let last = *values.last()?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max, last))
    }

    /// Render as CSV: an `epoch` column (1-indexed) plus one column per metric.
    pub fn to_csv(&self) -> String {
        let names = self.metric_names();
        let mut out = String::from("epoch");
        for name in &names {
            out.push(',');
            out.push_str(&csv_escape(name));
        }
        out.push('\n');
        for (i, bundle) in self.entries.iter().enumerate() {
            out.push_str(&(i + 1).to_string());
            for name in &names {
                out.push(',');
                if let Some(value) = bundle.get(name) {
                    out.push_str(&format!("{value:.6}"));
                }
            }
            out.push('\n');
        }
        out
    }
}
