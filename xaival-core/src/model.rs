//! Classifier collaborators.
//!
//! The evaluator talks to models only through the [`Model`] trait. Optional
//! capabilities (ground-truth importance, hidden-layer representations) are
//! exposed as separate traits and queried once, when an evaluation context is
//! built, via [`Model::ground_truth`] and [`Model::representation`].
//!
//! Two concrete models are provided: [`LogisticRegression`] and the
//! feed-forward [`NeuralNetwork`], both loadable from JSON weight files with
//! [`load_model`].

use crate::error::{CollaboratorError, EvalError, Result};
use crate::numeric::argmax;
use crate::types::{ExplanationVector, FeatureVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Result type returned by collaborator implementations.
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// A probabilistic classifier over fixed-width feature vectors.
///
/// Implementations must tolerate concurrent read-only calls when contexts are
/// evaluated from several threads.
pub trait Model: Send + Sync {
    /// Human-readable model name.
    fn name(&self) -> &str;

    /// Input dimensionality D.
    fn num_features(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Class-probability vectors, one per input row.
    fn predict_proba(&self, batch: &[FeatureVector]) -> CollabResult<Vec<Vec<f64>>>;

    /// Ground-truth importance capability, if the model has one.
    fn ground_truth(&self) -> Option<&dyn GroundTruthImportance> {
        None
    }

    /// Hidden-layer representation capability, if the model has one. The
    /// handle is kept by the evaluation context for later metric calls.
    fn representation(&self) -> Option<Arc<dyn LayerRepresentation>> {
        None
    }
}

/// Models whose true feature importance is known analytically.
pub trait GroundTruthImportance {
    fn ground_truth_importance(&self, x: &[f64]) -> CollabResult<ExplanationVector>;
}

/// Models that expose intermediate representations.
pub trait LayerRepresentation: Send + Sync {
    /// Number of hidden layers available.
    fn num_hidden_layers(&self) -> usize;

    /// Representation of each row at hidden layer `layer` (0-based), either
    /// before or after its activation.
    fn hidden_representation(
        &self,
        batch: &[FeatureVector],
        layer: usize,
        post_activation: bool,
    ) -> CollabResult<Vec<Vec<f64>>>;
}

/// Predicted label of a single input: argmax of its class probabilities.
pub fn predict_label(model: &dyn Model, x: &[f64]) -> Result<usize> {
    let probs = predict_one(model, x)?;
    argmax(&probs).ok_or_else(|| EvalError::dimension("class probabilities", 1, 0))
}

/// Class probabilities of a single input.
pub fn predict_one(model: &dyn Model, x: &[f64]) -> Result<Vec<f64>> {
    model
        .predict_proba(&[x.to_vec()])
        .map_err(EvalError::model)?
        .into_iter()
        .next()
        .ok_or_else(|| EvalError::dimension("model output rows", 1, 0))
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn check_width(batch: &[FeatureVector], width: usize) -> CollabResult<()> {
    if let Some(row) = batch.iter().find(|row| row.len() != width) {
        return Err(CollaboratorError::new(format!(
            "expected {width} features, got {}",
            row.len()
        )));
    }
    Ok(())
}

/// A fully connected layer: `weights` is `out x in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl DenseLayer {
    fn input_dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    fn output_dim(&self) -> usize {
        self.weights.len()
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.weights.is_empty() {
            return Err(EvalError::invalid_config(format!("{name}: empty weight matrix")));
        }
        let width = self.input_dim();
        if self.weights.iter().any(|row| row.len() != width) {
            return Err(EvalError::invalid_config(format!(
                "{name}: ragged weight matrix"
            )));
        }
        if self.bias.len() != self.output_dim() {
            return Err(EvalError::invalid_config(format!(
                "{name}: bias has {} entries for {} outputs",
                self.bias.len(),
                self.output_dim()
            )));
        }
        Ok(())
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }
}

/// Hidden-layer nonlinearity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    LeakyRelu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, v: f64) -> f64 {
        match self {
            Self::Relu => v.max(0.0),
            Self::LeakyRelu => {
                if v >= 0.0 {
                    v
                } else {
                    0.01 * v
                }
            }
            Self::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            Self::Tanh => v.tanh(),
        }
    }
}

/// Multinomial logistic regression: `softmax(W x + b)`.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    linear: DenseLayer,
}

impl LogisticRegression {
    pub fn new(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> Result<Self> {
        let linear = DenseLayer { weights, bias };
        linear.validate("logistic regression")?;
        if linear.output_dim() < 2 {
            return Err(EvalError::invalid_config(
                "logistic regression needs at least two classes",
            ));
        }
        Ok(Self { linear })
    }

    pub fn weights(&self) -> &[Vec<f64>] {
        &self.linear.weights
    }
}

impl Model for LogisticRegression {
    fn name(&self) -> &str {
        "LogisticRegression"
    }

    fn num_features(&self) -> usize {
        self.linear.input_dim()
    }

    fn num_classes(&self) -> usize {
        self.linear.output_dim()
    }

    fn predict_proba(&self, batch: &[FeatureVector]) -> CollabResult<Vec<Vec<f64>>> {
        check_width(batch, self.num_features())?;
        Ok(batch
            .iter()
            .map(|row| softmax(&self.linear.forward(row)))
            .collect())
    }

    fn ground_truth(&self) -> Option<&dyn GroundTruthImportance> {
        Some(self)
    }
}

impl GroundTruthImportance for LogisticRegression {
    /// Binary models: `W[1] - W[0]`. With more classes, the predicted class's
    /// weight row minus the mean row.
    fn ground_truth_importance(&self, x: &[f64]) -> CollabResult<ExplanationVector> {
        let w = &self.linear.weights;
        if w.len() == 2 {
            return Ok(w[1].iter().zip(&w[0]).map(|(a, b)| a - b).collect());
        }
        check_width(&[x.to_vec()], self.num_features())?;
        let probs = softmax(&self.linear.forward(x));
        let target = argmax(&probs).unwrap_or(0);
        let classes = w.len() as f64;
        Ok((0..self.num_features())
            .map(|j| {
                let mean = w.iter().map(|row| row[j]).sum::<f64>() / classes;
                w[target][j] - mean
            })
            .collect())
    }
}

/// Feed-forward network: hidden dense layers with a shared activation, then a
/// linear output layer and softmax.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    stack: Arc<LayerStack>,
}

/// The layers of a [`NeuralNetwork`], shared with its representation capability.
#[derive(Debug)]
struct LayerStack {
    layers: Vec<DenseLayer>,
    activation: Activation,
}

impl NeuralNetwork {
    pub fn new(layers: Vec<DenseLayer>, activation: Activation) -> Result<Self> {
        if layers.is_empty() {
            return Err(EvalError::invalid_config("neural network has no layers"));
        }
        for (i, layer) in layers.iter().enumerate() {
            layer.validate(&format!("layer {i}"))?;
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if pair[0].output_dim() != pair[1].input_dim() {
                return Err(EvalError::invalid_config(format!(
                    "layer {} outputs {} values but layer {} expects {}",
                    i,
                    pair[0].output_dim(),
                    i + 1,
                    pair[1].input_dim()
                )));
            }
        }
        let classes = layers.last().map(DenseLayer::output_dim).unwrap_or(0);
        if classes < 2 {
            return Err(EvalError::invalid_config(
                "neural network needs at least two output classes",
            ));
        }
        Ok(Self {
            stack: Arc::new(LayerStack { layers, activation }),
        })
    }

    pub fn activation(&self) -> Activation {
        self.stack.activation
    }
}

impl LayerStack {
    fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    fn logits(&self, row: &[f64]) -> Vec<f64> {
        let last = self.layers.len() - 1;
        let mut values = row.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            let pre = layer.forward(&values);
            values = if i < last {
                pre.into_iter().map(|v| self.activation.apply(v)).collect()
            } else {
                pre
            };
        }
        values
    }
}

impl Model for NeuralNetwork {
    fn name(&self) -> &str {
        "ArtificialNeuralNetwork"
    }

    fn num_features(&self) -> usize {
        self.stack.input_dim()
    }

    fn num_classes(&self) -> usize {
        self.stack.layers[self.stack.layers.len() - 1].output_dim()
    }

    fn predict_proba(&self, batch: &[FeatureVector]) -> CollabResult<Vec<Vec<f64>>> {
        check_width(batch, self.num_features())?;
        Ok(batch
            .iter()
            .map(|row| softmax(&self.stack.logits(row)))
            .collect())
    }

    fn representation(&self) -> Option<Arc<dyn LayerRepresentation>> {
        if self.stack.layers.len() > 1 {
            let stack: Arc<dyn LayerRepresentation> = self.stack.clone();
            Some(stack)
        } else {
            None
        }
    }
}

impl LayerRepresentation for LayerStack {
    fn num_hidden_layers(&self) -> usize {
        self.layers.len() - 1
    }

    fn hidden_representation(
        &self,
        batch: &[FeatureVector],
        layer: usize,
        post_activation: bool,
    ) -> CollabResult<Vec<Vec<f64>>> {
        let hidden = self.num_hidden_layers();
        if layer >= hidden {
            return Err(CollaboratorError::new(format!(
                "the model has only {hidden} hidden layers, but hidden layer {layer} was requested (indexing starts at 0)"
            )));
        }
        check_width(batch, self.input_dim())?;
        Ok(batch
            .iter()
            .map(|row| {
                let mut values = row.to_vec();
                for (i, dense) in self.layers[..=layer].iter().enumerate() {
                    let pre = dense.forward(&values);
                    values = if i < layer || post_activation {
                        pre.into_iter().map(|v| self.activation.apply(v)).collect()
                    } else {
                        pre
                    };
                }
                values
            })
            .collect())
    }
}

/// Serialized model description, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    LogisticRegression {
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    NeuralNetwork {
        layers: Vec<DenseLayer>,
        #[serde(default)]
        activation: Activation,
    },
}

impl ModelSpec {
    pub fn build(self) -> Result<Arc<dyn Model>> {
        Ok(match self {
            Self::LogisticRegression { weights, bias } => {
                Arc::new(LogisticRegression::new(weights, bias)?)
            }
            Self::NeuralNetwork { layers, activation } => {
                Arc::new(NeuralNetwork::new(layers, activation)?)
            }
        })
    }
}

/// Load a model from a JSON [`ModelSpec`] file.
pub fn load_model(path: &Path) -> Result<Arc<dyn Model>> {
    let content = std::fs::read_to_string(path)?;
    let spec: ModelSpec = serde_json::from_str(&content)?;
    let model = spec.build()?;
    tracing::info!(
        model = model.name(),
        features = model.num_features(),
        classes = model.num_classes(),
        path = %path.display(),
        "Loaded model"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_lr() -> LogisticRegression {
        LogisticRegression::new(vec![vec![0.5, -1.0], vec![-0.5, 1.0]], vec![0.0, 0.0]).unwrap()
    }

    #[test]
    fn test_logistic_probabilities_sum_to_one() {
        let model = binary_lr();
        let probs = model.predict_proba(&[vec![1.0, 2.0]]).unwrap();
        assert!((probs[0].iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[0][1] > probs[0][0]);
        assert_eq!(predict_label(&model, &[1.0, 2.0]).unwrap(), 1);
    }

    #[test]
    fn test_logistic_ground_truth_is_weight_difference() {
        let model = binary_lr();
        let gt = model
            .ground_truth()
            .unwrap()
            .ground_truth_importance(&[0.0, 0.0])
            .unwrap();
        assert_eq!(gt, vec![-1.0, 2.0]);
    }

    #[test]
    fn test_logistic_rejects_wrong_width() {
        let model = binary_lr();
        assert!(model.predict_proba(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_network_hidden_representation() {
        let layers = vec![
            DenseLayer {
                weights: vec![vec![1.0, 0.0], vec![0.0, -1.0]],
                bias: vec![0.0, 0.0],
            },
            DenseLayer {
                weights: vec![vec![1.0, 1.0], vec![-1.0, -1.0]],
                bias: vec![0.0, 0.0],
            },
        ];
        let model = NeuralNetwork::new(layers, Activation::Relu).unwrap();
        assert!(model.ground_truth().is_none());
        let repr = model.representation().unwrap();
        assert_eq!(repr.num_hidden_layers(), 1);

        let post = repr
            .hidden_representation(&[vec![2.0, 3.0]], 0, true)
            .unwrap();
        assert_eq!(post[0], vec![2.0, 0.0]);
        let pre = repr
            .hidden_representation(&[vec![2.0, 3.0]], 0, false)
            .unwrap();
        assert_eq!(pre[0], vec![2.0, -3.0]);
        assert!(repr.hidden_representation(&[vec![2.0, 3.0]], 1, true).is_err());
    }

    #[test]
    fn test_network_rejects_mismatched_layers() {
        let layers = vec![
            DenseLayer {
                weights: vec![vec![1.0, 0.0]],
                bias: vec![0.0],
            },
            DenseLayer {
                weights: vec![vec![1.0, 1.0], vec![1.0, 1.0]],
                bias: vec![0.0, 0.0],
            },
        ];
        assert!(matches!(
            NeuralNetwork::new(layers, Activation::Tanh),
            Err(EvalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_model_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lr.json");
        std::fs::write(
            &path,
            r#"{"kind": "logistic_regression", "weights": [[1.0, 0.0], [0.0, 1.0]], "bias": [0.0, 0.0]}"#,
        )
        .unwrap();
        let model = load_model(&path).unwrap();
        assert_eq!(model.num_features(), 2);
        assert_eq!(model.num_classes(), 2);
        assert!(model.ground_truth().is_some());
    }
}
