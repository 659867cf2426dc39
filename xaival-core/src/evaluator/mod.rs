//! Explanation evaluator.
//!
//! An [`EvaluationContext`] bundles one input point with everything needed to
//! score its explanation: model, explainer, perturbation generator, feature
//! metadata, top-k mask and (optionally) ground-truth importance. It is built
//! and validated once by [`EvaluationContextBuilder`] and is read-only
//! afterwards. [`Evaluator`] computes metrics over a context; every
//! perturbation-based metric call draws its own fresh neighbourhood.

pub mod agreement;
pub mod faithfulness;
pub mod stability;

use crate::config::{EvaluationSettings, XaivalConfig};
use crate::error::{EvalError, Result};
use crate::explainer::Explainer;
use crate::model::{LayerRepresentation, Model, predict_one};
use crate::numeric::{argmax, lp_distance};
use crate::perturbation::Perturber;
use crate::types::{ExplanationVector, FeatureTypes, FeatureVector, Metric, TopKMask, generate_mask};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a metric needs about one explained input.
pub struct EvaluationContext {
    x: FeatureVector,
    label: Option<usize>,
    predicted_label: usize,
    probabilities: Vec<f64>,
    explanation: ExplanationVector,
    mask: TopKMask,
    feature_types: FeatureTypes,
    model: Arc<dyn Model>,
    explainer: Arc<dyn Explainer>,
    perturber: Arc<dyn Perturber>,
    ground_truth: Option<ExplanationVector>,
    representation: Option<Arc<dyn LayerRepresentation>>,
    settings: EvaluationSettings,
}

impl EvaluationContext {
    pub fn builder(
        model: Arc<dyn Model>,
        explainer: Arc<dyn Explainer>,
        perturber: Arc<dyn Perturber>,
    ) -> EvaluationContextBuilder {
        EvaluationContextBuilder::new(model, explainer, perturber)
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// True label, when the caller supplied one.
    pub fn label(&self) -> Option<usize> {
        self.label
    }

    pub fn predicted_label(&self) -> usize {
        self.predicted_label
    }

    /// Model class probabilities at `x`.
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn explanation(&self) -> &[f64] {
        &self.explanation
    }

    pub fn mask(&self) -> &TopKMask {
        &self.mask
    }

    pub fn top_k(&self) -> usize {
        self.mask.k()
    }

    pub fn feature_types(&self) -> &FeatureTypes {
        &self.feature_types
    }

    pub fn ground_truth(&self) -> Option<&[f64]> {
        self.ground_truth.as_deref()
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn explainer(&self) -> &Arc<dyn Explainer> {
        &self.explainer
    }

    pub fn perturber(&self) -> &Arc<dyn Perturber> {
        &self.perturber
    }

    fn norm_order(&self) -> f64 {
        self.perturber.config().norm_order
    }

    fn max_distance(&self) -> f64 {
        self.perturber.config().max_distance
    }

    /// Draw up to `num_samples` neighbours within `max_distance` of `x`.
    ///
    /// Features flagged in `fixed` are held at their original value. Sampling
    /// runs in rounds of `num_samples` draws, at most `max_resample_rounds`
    /// times.
    fn sample_neighbourhood(
        &self,
        metric: Metric,
        fixed: &[bool],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<FeatureVector>> {
        let wanted = self.settings.num_samples;
        let p = self.norm_order();
        let radius = self.max_distance();

        let mut kept = Vec::with_capacity(wanted);
        let mut rounds = 0;
        while kept.len() < wanted && rounds < self.settings.max_resample_rounds {
            let drawn =
                self.perturber
                    .perturb_masked(&self.x, &self.feature_types, fixed, wanted, rng)?;
            kept.extend(
                drawn
                    .into_iter()
                    .filter(|s| lp_distance(s, &self.x, p) <= radius),
            );
            rounds += 1;
        }
        kept.truncate(wanted);

        if kept.is_empty() {
            return Err(EvalError::EmptyNeighbourhood {
                metric: metric.to_string(),
            });
        }
        if kept.len() < wanted {
            warn!(
                metric = %metric,
                kept = kept.len(),
                wanted,
                "Neighbourhood smaller than requested"
            );
        }
        debug!(metric = %metric, samples = kept.len(), rounds, "Sampled neighbourhood");
        Ok(kept)
    }

    /// Class probabilities for a batch, checked for shape.
    fn predict_batch(&self, batch: &[FeatureVector]) -> Result<Vec<Vec<f64>>> {
        let probs = self.model.predict_proba(batch).map_err(EvalError::model)?;
        if probs.len() != batch.len() {
            return Err(EvalError::dimension("model output rows", batch.len(), probs.len()));
        }
        let classes = self.probabilities.len();
        if let Some(row) = probs.iter().find(|row| row.len() != classes) {
            return Err(EvalError::dimension("class probabilities", classes, row.len()));
        }
        Ok(probs)
    }
}

/// Builds and validates an [`EvaluationContext`].
pub struct EvaluationContextBuilder {
    model: Arc<dyn Model>,
    explainer: Arc<dyn Explainer>,
    perturber: Arc<dyn Perturber>,
    x: Option<FeatureVector>,
    feature_types: Option<FeatureTypes>,
    label: Option<usize>,
    explanation: Option<ExplanationVector>,
    ground_truth: Option<ExplanationVector>,
    top_k: Option<usize>,
    settings: EvaluationSettings,
}

impl EvaluationContextBuilder {
    pub fn new(
        model: Arc<dyn Model>,
        explainer: Arc<dyn Explainer>,
        perturber: Arc<dyn Perturber>,
    ) -> Self {
        Self {
            model,
            explainer,
            perturber,
            x: None,
            feature_types: None,
            label: None,
            explanation: None,
            ground_truth: None,
            top_k: None,
            settings: EvaluationSettings::default(),
        }
    }

    /// The input point to evaluate.
    pub fn input(mut self, x: FeatureVector) -> Self {
        self.x = Some(x);
        self
    }

    /// Feature-type metadata; all continuous when omitted.
    pub fn feature_types(mut self, feature_types: FeatureTypes) -> Self {
        self.feature_types = Some(feature_types);
        self
    }

    pub fn label(mut self, label: usize) -> Self {
        self.label = Some(label);
        self
    }

    /// Precomputed explanation of `x`. Computed with the explainer for the
    /// predicted label when omitted.
    pub fn explanation(mut self, explanation: ExplanationVector) -> Self {
        self.explanation = Some(explanation);
        self
    }

    /// Ground-truth importance, overriding the model's own capability.
    pub fn ground_truth(mut self, ground_truth: ExplanationVector) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Top-k size; `settings.top_k` when omitted.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn settings(mut self, settings: EvaluationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Apply the evaluation section of a loaded configuration.
    pub fn config(self, config: &XaivalConfig) -> Self {
        self.settings(config.evaluation.clone())
    }

    pub fn build(self) -> Result<EvaluationContext> {
        self.settings.validate()?;
        self.perturber.config().validate()?;

        let x = self
            .x
            .ok_or_else(|| EvalError::invalid_config("no input point supplied"))?;
        let dim = self.model.num_features();
        if x.len() != dim {
            return Err(EvalError::dimension("input", dim, x.len()));
        }
        let feature_types = self
            .feature_types
            .unwrap_or_else(|| FeatureTypes::all_continuous(dim));
        feature_types.check_dim(dim)?;

        let probabilities = predict_one(self.model.as_ref(), &x)?;
        let predicted_label = argmax(&probabilities)
            .ok_or_else(|| EvalError::dimension("class probabilities", 1, 0))?;

        let explanation = match self.explanation {
            Some(e) => e,
            None => self
                .explainer
                .explain(&[x.clone()], &[predicted_label])
                .map_err(EvalError::explainer)?
                .into_iter()
                .next()
                .ok_or_else(|| EvalError::dimension("explanations", 1, 0))?,
        };
        if explanation.len() != dim {
            return Err(EvalError::dimension("explanation", dim, explanation.len()));
        }

        // Capabilities are queried once, here.
        let ground_truth = match self.ground_truth {
            Some(g) => Some(g),
            None => match self.model.ground_truth() {
                Some(capability) => Some(
                    capability
                        .ground_truth_importance(&x)
                        .map_err(EvalError::model)?,
                ),
                None => None,
            },
        };
        if let Some(g) = &ground_truth {
            if g.len() != dim {
                return Err(EvalError::dimension("ground truth", dim, g.len()));
            }
        }
        let representation = self.model.representation();
        if let Some(capability) = &representation {
            let hidden = capability.num_hidden_layers();
            if self.settings.representation_layer >= hidden {
                return Err(EvalError::invalid_config(format!(
                    "representation_layer {} is out of range: the model has {} hidden layers",
                    self.settings.representation_layer, hidden
                )));
            }
        }

        let k = self.top_k.unwrap_or(self.settings.top_k);
        let mask = generate_mask(&explanation, k)?;

        debug!(
            model = self.model.name(),
            explainer = self.explainer.name(),
            perturbation = self.perturber.name(),
            predicted_label,
            top_k = k,
            ground_truth = ground_truth.is_some(),
            representation = representation.is_some(),
            "Built evaluation context"
        );

        Ok(EvaluationContext {
            x,
            label: self.label,
            predicted_label,
            probabilities,
            explanation,
            mask,
            feature_types,
            model: self.model,
            explainer: self.explainer,
            perturber: self.perturber,
            ground_truth,
            representation,
            settings: self.settings,
        })
    }
}

/// Outcome of one metric in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOutcome {
    Value(f64),
    Error(String),
}

/// Scores for several metrics over one context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub explainer: String,
    pub perturbation: String,
    pub label: Option<usize>,
    pub predicted_label: usize,
    pub top_k: Vec<usize>,
    pub explanation: ExplanationVector,
    pub results: BTreeMap<Metric, MetricOutcome>,
}

impl EvaluationReport {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match self.results.get(&metric) {
            Some(MetricOutcome::Value(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn failures(&self) -> usize {
        self.results
            .values()
            .filter(|o| matches!(o, MetricOutcome::Error(_)))
            .count()
    }
}

/// Computes metrics over an [`EvaluationContext`].
pub struct Evaluator {
    context: EvaluationContext,
}

impl Evaluator {
    pub fn new(context: EvaluationContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    /// Evaluate a metric by name. Unknown names fail with `UnsupportedMetric`.
    pub fn evaluate_named(&self, name: &str) -> Result<f64> {
        let metric: Metric = name.parse()?;
        self.evaluate(metric)
    }

    /// Evaluate a metric with a fresh random source: seeded from
    /// `settings.seed` when set, so repeated calls agree exactly.
    pub fn evaluate(&self, metric: Metric) -> Result<f64> {
        let mut rng = match self.context.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.evaluate_with_rng(metric, &mut rng)
    }

    /// Evaluate a metric drawing randomness from `rng`.
    pub fn evaluate_with_rng(&self, metric: Metric, rng: &mut dyn RngCore) -> Result<f64> {
        let ctx = &self.context;
        let value = match metric {
            Metric::Pgu => faithfulness::prediction_gap(ctx, metric, ctx.mask.as_flags(), rng)?,
            Metric::Pgi => {
                faithfulness::prediction_gap(ctx, metric, &ctx.mask.complement_flags(), rng)?
            }
            Metric::Ris => {
                stability::relative_stability(ctx, stability::Reference::Input, rng)?
            }
            Metric::Ros => {
                stability::relative_stability(ctx, stability::Reference::Output, rng)?
            }
            Metric::Rrs => {
                let capability = ctx.representation.as_deref().ok_or_else(|| {
                    EvalError::MissingRepresentation {
                        metric: metric.to_string(),
                    }
                })?;
                stability::relative_stability(
                    ctx,
                    stability::Reference::Representation(capability),
                    rng,
                )?
            }
            Metric::Rc | Metric::Fa | Metric::Ra | Metric::Sa | Metric::Sra | Metric::Pra => {
                let truth = ctx
                    .ground_truth
                    .as_deref()
                    .ok_or_else(|| EvalError::MissingGroundTruth {
                        metric: metric.to_string(),
                    })?;
                agreement::score(metric, &ctx.explanation, truth, ctx.mask.k())?
            }
        };

        if !value.is_finite() {
            return Err(EvalError::degenerate(
                metric.to_string(),
                format!("metric evaluated to {value}"),
            ));
        }
        debug!(metric = %metric, value, "Evaluated metric");
        Ok(value)
    }

    /// Evaluate several metrics, recording failures instead of stopping.
    pub fn evaluate_all(&self, metrics: &[Metric]) -> EvaluationReport {
        let mut results = BTreeMap::new();
        for &metric in metrics {
            let outcome = match self.evaluate(metric) {
                Ok(v) => MetricOutcome::Value(v),
                Err(e) => {
                    warn!(metric = %metric, error = %e, "Metric failed");
                    MetricOutcome::Error(e.to_string())
                }
            };
            results.insert(metric, outcome);
        }

        let ctx = &self.context;
        let report = EvaluationReport {
            generated_at: Utc::now(),
            model: ctx.model.name().to_string(),
            explainer: ctx.explainer.name().to_string(),
            perturbation: ctx.perturber.name().to_string(),
            label: ctx.label,
            predicted_label: ctx.predicted_label,
            top_k: ctx.mask.indices().to_vec(),
            explanation: ctx.explanation.clone(),
            results,
        };
        info!(
            metrics = metrics.len(),
            failures = report.failures(),
            "Evaluation complete"
        );
        report
    }
}
