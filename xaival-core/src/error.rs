//! Error types for the xaival evaluation core.
//!
//! Uses `thiserror` for the public error taxonomy. Every variant is fatal to
//! the call that produced it; nothing in the evaluator retries.

use thiserror::Error;

/// Error reported by a model or explainer implementation.
///
/// Collaborators live outside this crate, so their failures are carried as a
/// message and wrapped into [`EvalError::CollaboratorFailure`] by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for evaluation operations.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unsupported metric: {name}")]
    UnsupportedMetric { name: String },

    #[error("Metric {metric} requires ground-truth importance, but none is available")]
    MissingGroundTruth { metric: String },

    #[error("Metric {metric} requires hidden-layer representations, but the model exposes none")]
    MissingRepresentation { metric: String },

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Numeric degeneracy in {metric}: {detail}")]
    NumericDegeneracy { metric: String, detail: String },

    #[error("{collaborator} failed: {source}")]
    CollaboratorFailure {
        collaborator: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("No perturbed samples satisfied the neighbourhood constraints for {metric}")]
    EmptyNeighbourhood { metric: String },

    #[error("Unsupported explainer: {method}")]
    UnsupportedExplainer { method: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl EvalError {
    pub fn unsupported_metric(name: impl Into<String>) -> Self {
        Self::UnsupportedMetric { name: name.into() }
    }

    pub fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    pub fn degenerate(metric: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NumericDegeneracy {
            metric: metric.into(),
            detail: detail.into(),
        }
    }

    pub fn model(source: CollaboratorError) -> Self {
        Self::CollaboratorFailure {
            collaborator: "model",
            source,
        }
    }

    pub fn explainer(source: CollaboratorError) -> Self {
        Self::CollaboratorFailure {
            collaborator: "explainer",
            source,
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_failure_display() {
        let err = EvalError::model(CollaboratorError::new("weights not loaded"));
        assert_eq!(err.to_string(), "model failed: weights not loaded");
    }

    #[test]
    fn test_dimension_display() {
        let err = EvalError::dimension("feature types", 13, 12);
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for feature types: expected 13, got 12"
        );
    }
}
