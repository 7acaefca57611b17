//! Error types for the advtrain-ml crate.

use advtrain_core::{ArtifactError, ConfigError};
use thiserror::Error;

/// Rejected attack budget. Raised before any gradient is computed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidBoundsError {
    #[error("Attack strength must be positive and finite, got {strength}")]
    Strength { strength: f32 },

    #[error("Attack step count must be positive")]
    Steps,
}

/// Unrecoverable training failure; ends the current run (or trial).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalTrainingError {
    #[error("Loss diverged at epoch {epoch}, batch {batch}: {loss}")]
    Diverged { epoch: usize, batch: usize, loss: f32 },

    #[error("Non-finite {metric} at epoch {epoch}")]
    NonFiniteMetric { epoch: usize, metric: String },
}

/// A batch that cannot be trained on. Logged and skipped, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Empty batch")]
    Empty,

    #[error(
        "Malformed batch: {rows} rows, {labels} labels, {features} features (expected {expected})"
    )]
    Malformed {
        rows: usize,
        labels: usize,
        features: usize,
        expected: usize,
    },

    #[error("Batch contains non-finite values")]
    NonFinite,
}

/// Top-level error type for model, attack, and training operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Invalid attack bounds: {0}")]
    InvalidBounds(#[from] InvalidBoundsError),

    #[error("Fatal training error: {0}")]
    FatalTraining(#[from] FatalTrainingError),

    #[error("Shape mismatch for {what}: got {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Search finished without a completed trial ({n_trials} trials run)")]
    NoCompletedTrials { n_trials: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// Whether this error ends only the current search trial.
    ///
    /// Attack-bound and divergence failures are properties of the sampled
    /// hyperparameters; everything else is an environment or configuration
    /// problem that would fail every trial the same way.
    pub fn is_trial_fatal(&self) -> bool {
        matches!(self, Self::InvalidBounds(_) | Self::FatalTraining(_))
    }
}

pub type Result<T> = std::result::Result<T, MlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MlError::from(InvalidBoundsError::Strength { strength: 0.0 });
        assert_eq!(
            err.to_string(),
            "Invalid attack bounds: Attack strength must be positive and finite, got 0"
        );

        let err = MlError::from(FatalTrainingError::Diverged {
            epoch: 2,
            batch: 5,
            loss: f32::NAN,
        });
        assert!(err.to_string().contains("epoch 2, batch 5"));
    }

    #[test]
    fn test_trial_fatal_classification() {
        assert!(MlError::from(InvalidBoundsError::Steps).is_trial_fatal());
        assert!(
            MlError::from(FatalTrainingError::NonFiniteMetric {
                epoch: 0,
                metric: "loss".into()
            })
            .is_trial_fatal()
        );
        assert!(!MlError::from(ConfigError::unknown("optimizer", "Lion")).is_trial_fatal());
        assert!(!MlError::dataset("bad labels").is_trial_fatal());
    }
}
