//! Error types for the foldwise-train crate.

use thiserror::Error;

/// Top-level error type for training and cross-validation runs.
///
/// Shape, device and resource errors originate in the model collaborators and
/// are never recovered inside the loop; they abort the run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Logging sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration source error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl TrainError {
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Whether this error was reported by a configuration check rather than
    /// by running the model.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Figment(_))
    }
}
