//! Explanation providers.
//!
//! An [`Explainer`] maps inputs and target labels to per-feature attribution
//! vectors. Methods are configured through the strongly typed
//! [`ExplainerMethod`] and instantiated by name through an
//! [`ExplainerRegistry`]. The registry ships with two model-agnostic
//! providers (`gradient`, `constant`); sampling- or path-based methods such as
//! LIME and Integrated Gradients are recognized by configuration but must be
//! registered by the embedding application.

use crate::error::{CollaboratorError, EvalError, Result};
use crate::model::{CollabResult, Model};
use crate::types::{ExplanationVector, FeatureVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Produces feature attributions for a batch of inputs.
pub trait Explainer: Send + Sync {
    /// Method name this explainer implements.
    fn name(&self) -> &str;

    /// One attribution vector per input, explaining the paired label.
    fn explain(
        &self,
        inputs: &[FeatureVector],
        labels: &[usize],
    ) -> CollabResult<Vec<ExplanationVector>>;
}

/// Sampling mode for LIME.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimeMode {
    #[default]
    Tabular,
}

/// Options recognized by the LIME tabular explainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimeConfig {
    /// Standard deviation of the sampling distribution.
    #[serde(default = "default_lime_std")]
    pub std: f64,
    #[serde(default)]
    pub mode: LimeMode,
    /// Sample around the explained instance rather than the training mean.
    #[serde(default = "default_true")]
    pub sample_around_instance: bool,
    /// Width of the exponential locality kernel.
    #[serde(default = "default_kernel_width")]
    pub kernel_width: f64,
    /// Number of neighbourhood samples.
    #[serde(default = "default_lime_samples")]
    pub n_samples: usize,
    #[serde(default)]
    pub discretize_continuous: bool,
}

impl Default for LimeConfig {
    fn default() -> Self {
        Self {
            std: default_lime_std(),
            mode: LimeMode::default(),
            sample_around_instance: true,
            kernel_width: default_kernel_width(),
            n_samples: default_lime_samples(),
            discretize_continuous: false,
        }
    }
}

fn default_lime_std() -> f64 {
    0.1
}

fn default_kernel_width() -> f64 {
    0.75
}

fn default_lime_samples() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

/// Quadrature rule for Integrated Gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationRule {
    #[default]
    GaussLegendre,
    RiemannLeft,
    RiemannRight,
    RiemannMiddle,
    RiemannTrapezoid,
}

/// Options recognized by Integrated Gradients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedGradientsConfig {
    #[serde(default)]
    pub method: IntegrationRule,
    #[serde(default)]
    pub multiply_by_inputs: bool,
    #[serde(default = "default_ig_steps")]
    pub n_steps: usize,
    /// Path origin; all zeros when absent.
    #[serde(default)]
    pub baseline: Option<Vec<f64>>,
}

impl Default for IntegratedGradientsConfig {
    fn default() -> Self {
        Self {
            method: IntegrationRule::default(),
            multiply_by_inputs: false,
            n_steps: default_ig_steps(),
            baseline: None,
        }
    }
}

fn default_ig_steps() -> usize {
    50
}

/// Options for the finite-difference gradient explainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientConfig {
    /// Central-difference step size.
    #[serde(default = "default_gradient_step")]
    pub step: f64,
    /// Report gradient x input instead of the raw gradient.
    #[serde(default)]
    pub multiply_by_inputs: bool,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            step: default_gradient_step(),
            multiply_by_inputs: false,
        }
    }
}

fn default_gradient_step() -> f64 {
    1e-4
}

/// Explanation method plus its typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ExplainerMethod {
    Lime(LimeConfig),
    IntegratedGradients(IntegratedGradientsConfig),
    Gradient(GradientConfig),
    Constant { values: Vec<f64> },
}

impl Default for ExplainerMethod {
    fn default() -> Self {
        Self::Gradient(GradientConfig::default())
    }
}

impl ExplainerMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lime(_) => "lime",
            Self::IntegratedGradients(_) => "integrated_gradients",
            Self::Gradient(_) => "gradient",
            Self::Constant { .. } => "constant",
        }
    }
}

fn check_labels(inputs: &[FeatureVector], labels: &[usize]) -> CollabResult<()> {
    if inputs.len() != labels.len() {
        return Err(CollaboratorError::new(format!(
            "{} inputs but {} labels",
            inputs.len(),
            labels.len()
        )));
    }
    Ok(())
}

/// Central finite-difference sensitivity of the target class probability.
pub struct GradientExplainer {
    model: Arc<dyn Model>,
    config: GradientConfig,
}

impl GradientExplainer {
    pub fn new(model: Arc<dyn Model>, config: GradientConfig) -> Result<Self> {
        if !(config.step.is_finite() && config.step > 0.0) {
            return Err(EvalError::invalid_config(format!(
                "gradient step must be positive, got {}",
                config.step
            )));
        }
        Ok(Self { model, config })
    }

    fn explain_one(&self, x: &[f64], label: usize) -> CollabResult<ExplanationVector> {
        let h = self.config.step;
        let dim = x.len();
        let mut probes = Vec::with_capacity(2 * dim);
        for j in 0..dim {
            let mut up = x.to_vec();
            up[j] += h;
            let mut down = x.to_vec();
            down[j] -= h;
            probes.push(up);
            probes.push(down);
        }
        let probs = self.model.predict_proba(&probes)?;
        if probs.len() != probes.len() {
            return Err(CollaboratorError::new(format!(
                "model returned {} rows for {} inputs",
                probs.len(),
                probes.len()
            )));
        }
        (0..dim)
            .map(|j| {
                let up = probs[2 * j].get(label);
                let down = probs[2 * j + 1].get(label);
                match (up, down) {
                    (Some(up), Some(down)) => {
                        let grad = (up - down) / (2.0 * h);
                        Ok(if self.config.multiply_by_inputs {
                            grad * x[j]
                        } else {
                            grad
                        })
                    }
                    _ => Err(CollaboratorError::new(format!(
                        "label {label} outside model output"
                    ))),
                }
            })
            .collect()
    }
}

impl Explainer for GradientExplainer {
    fn name(&self) -> &str {
        "gradient"
    }

    fn explain(
        &self,
        inputs: &[FeatureVector],
        labels: &[usize],
    ) -> CollabResult<Vec<ExplanationVector>> {
        check_labels(inputs, labels)?;
        inputs
            .iter()
            .zip(labels)
            .map(|(x, &label)| self.explain_one(x, label))
            .collect()
    }
}

/// Returns the same attribution for every input.
pub struct ConstantExplainer {
    values: ExplanationVector,
}

impl ConstantExplainer {
    pub fn new(values: ExplanationVector) -> Self {
        Self { values }
    }
}

impl Explainer for ConstantExplainer {
    fn name(&self) -> &str {
        "constant"
    }

    fn explain(
        &self,
        inputs: &[FeatureVector],
        labels: &[usize],
    ) -> CollabResult<Vec<ExplanationVector>> {
        check_labels(inputs, labels)?;
        Ok(vec![self.values.clone(); inputs.len()])
    }
}

/// Builds an explainer for a model from its method configuration.
pub type ExplainerFactory =
    Box<dyn Fn(&ExplainerMethod, Arc<dyn Model>) -> Result<Arc<dyn Explainer>> + Send + Sync>;

/// Explanation methods available by name.
pub struct ExplainerRegistry {
    factories: HashMap<String, ExplainerFactory>,
}

impl Default for ExplainerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ExplainerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the `gradient` and `constant` providers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .factories
            .insert("gradient".into(), Box::new(build_gradient));
        registry
            .factories
            .insert("constant".into(), Box::new(build_constant));
        registry
    }

    /// Register a provider. Fails if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, factory: ExplainerFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(EvalError::invalid_config(format!(
                "explainer '{name}' is already registered"
            )));
        }
        debug!(explainer = %name, "Registering explainer");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the explainer configured by `method` for `model`.
    pub fn build(&self, method: &ExplainerMethod, model: Arc<dyn Model>) -> Result<Arc<dyn Explainer>> {
        let factory = self
            .factories
            .get(method.name())
            .ok_or_else(|| EvalError::UnsupportedExplainer {
                method: method.name().to_string(),
            })?;
        factory(method, model)
    }
}

fn build_gradient(method: &ExplainerMethod, model: Arc<dyn Model>) -> Result<Arc<dyn Explainer>> {
    match method {
        ExplainerMethod::Gradient(config) => {
            let explainer: Arc<dyn Explainer> =
                Arc::new(GradientExplainer::new(model, config.clone())?);
            Ok(explainer)
        }
        other => Err(mismatched(other, "gradient")),
    }
}

fn build_constant(method: &ExplainerMethod, model: Arc<dyn Model>) -> Result<Arc<dyn Explainer>> {
    match method {
        ExplainerMethod::Constant { values } => {
            if values.len() != model.num_features() {
                return Err(EvalError::dimension(
                    "constant explanation",
                    model.num_features(),
                    values.len(),
                ));
            }
            let explainer: Arc<dyn Explainer> = Arc::new(ConstantExplainer::new(values.clone()));
            Ok(explainer)
        }
        other => Err(mismatched(other, "constant")),
    }
}

fn mismatched(method: &ExplainerMethod, expected: &str) -> EvalError {
    EvalError::invalid_config(format!(
        "factory '{expected}' cannot build a '{}' explainer",
        method.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogisticRegression;

    fn model() -> Arc<dyn Model> {
        Arc::new(
            LogisticRegression::new(vec![vec![0.0, 0.0], vec![1.0, -2.0]], vec![0.0, 0.0])
                .unwrap(),
        )
    }

    #[test]
    fn test_gradient_matches_logistic_derivative() {
        let explainer = GradientExplainer::new(model(), GradientConfig::default()).unwrap();
        let x = vec![0.3, 0.1];
        let attributions = explainer.explain(&[x.clone()], &[1]).unwrap();
        // d sigmoid(z)/dx = s(1 - s) * w
        let z: f64 = 0.3 - 0.2;
        let s = 1.0 / (1.0 + (-z).exp());
        let expected = [s * (1.0 - s) * 1.0, s * (1.0 - s) * -2.0];
        for (a, e) in attributions[0].iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{a} vs {e}");
        }
    }

    #[test]
    fn test_gradient_times_input() {
        let config = GradientConfig {
            multiply_by_inputs: true,
            ..GradientConfig::default()
        };
        let explainer = GradientExplainer::new(model(), config).unwrap();
        let attributions = explainer.explain(&[vec![0.0, 1.0]], &[1]).unwrap();
        assert!(attributions[0][0].abs() < 1e-12);
    }

    #[test]
    fn test_label_count_mismatch() {
        let explainer = ConstantExplainer::new(vec![1.0, 2.0]);
        assert!(explainer.explain(&[vec![0.0, 0.0]], &[]).is_err());
    }

    #[test]
    fn test_registry_builds_builtins() {
        let registry = ExplainerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["constant", "gradient"]);
        let explainer = registry
            .build(&ExplainerMethod::default(), model())
            .unwrap();
        assert_eq!(explainer.name(), "gradient");
    }

    #[test]
    fn test_registry_rejects_unregistered_method() {
        let registry = ExplainerRegistry::with_builtins();
        let err = registry
            .build(&ExplainerMethod::Lime(LimeConfig::default()), model())
            .err()
            .unwrap();
        assert!(matches!(err, EvalError::UnsupportedExplainer { method } if method == "lime"));
    }

    #[test]
    fn test_registry_accepts_external_provider() {
        let mut registry = ExplainerRegistry::with_builtins();
        registry
            .register(
                "lime",
                Box::new(|_: &ExplainerMethod, model: Arc<dyn Model>| {
                    let explainer: Arc<dyn Explainer> =
                        Arc::new(ConstantExplainer::new(vec![0.0; model.num_features()]));
                    Ok(explainer)
                }),
            )
            .unwrap();
        assert!(registry.contains("lime"));
        assert!(
            registry
                .register("lime", Box::new(build_constant))
                .is_err()
        );
    }

    #[test]
    fn test_method_serde_is_tagged() {
        let method: ExplainerMethod =
            serde_json::from_str(r#"{"method": "lime", "n_samples": 500}"#).unwrap();
        match method {
            ExplainerMethod::Lime(config) => {
                assert_eq!(config.n_samples, 500);
                assert_eq!(config.kernel_width, 0.75);
                assert!(config.sample_around_instance);
            }
            other => panic!("unexpected method {other:?}"),
        }
    }
}
