//! Relative stability metrics (RIS, ROS, RRS).
//!
//! For each neighbour x' the ratio
//!
//! ```text
//!     ‖(e(x) - e(x')) / e(x)‖_p
//!     ─────────────────────────────
//!     max(‖(r(x) - r(x')) / r(x)‖_p, ε)
//! ```
//!
//! is computed, where `r` is the input itself (RIS), the class-probability
//! vector (ROS) or a hidden-layer representation (RRS). The metric is the
//! maximum ratio over the neighbourhood. Elementwise divisions use the
//! stable-denominator policy in [`crate::numeric`].

use super::EvaluationContext;
use crate::error::{EvalError, Result};
use crate::model::LayerRepresentation;
use crate::numeric::{argmax, floor_eps, lp_norm, relative_change};
use crate::types::{FeatureVector, Metric};
use rand::RngCore;
use tracing::debug;

/// What the explanation change is measured against.
#[derive(Clone, Copy)]
pub enum Reference<'a> {
    Input,
    Output,
    /// Hidden layer of a model, resolved when the context was built.
    Representation(&'a dyn LayerRepresentation),
}

impl Reference<'_> {
    fn metric(self) -> Metric {
        match self {
            Self::Input => Metric::Ris,
            Self::Output => Metric::Ros,
            Self::Representation(_) => Metric::Rrs,
        }
    }
}

/// One stability ratio.
pub fn stability_ratio(
    explanation: &[f64],
    perturbed_explanation: &[f64],
    reference: &[f64],
    perturbed_reference: &[f64],
    p: f64,
    eps: f64,
) -> f64 {
    let numerator = lp_norm(&relative_change(explanation, perturbed_explanation, eps), p);
    let denominator = lp_norm(&relative_change(reference, perturbed_reference, eps), p);
    numerator / floor_eps(denominator, eps)
}

/// Worst-case stability ratio over a fresh neighbourhood of `x`.
pub fn relative_stability(
    ctx: &EvaluationContext,
    reference: Reference<'_>,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    let metric = reference.metric();
    let dim = ctx.x.len();
    let free = vec![false; dim];
    let mut samples = ctx.sample_neighbourhood(metric, &free, rng)?;
    let mut probs = ctx.predict_batch(&samples)?;

    if ctx.settings.require_same_prediction {
        let target = ctx.predicted_label;
        let (kept_samples, kept_probs): (Vec<_>, Vec<_>) = samples
            .into_iter()
            .zip(probs)
            .filter(|(_, row)| argmax(row) == Some(target))
            .unzip();
        samples = kept_samples;
        probs = kept_probs;
        if samples.is_empty() {
            return Err(EvalError::EmptyNeighbourhood {
                metric: metric.to_string(),
            });
        }
    }

    let labels = vec![ctx.predicted_label; samples.len()];
    let explanations = ctx
        .explainer
        .explain(&samples, &labels)
        .map_err(EvalError::explainer)?;
    if explanations.len() != samples.len() {
        return Err(EvalError::dimension(
            "explanations",
            samples.len(),
            explanations.len(),
        ));
    }
    if let Some(e) = explanations.iter().find(|e| e.len() != dim) {
        return Err(EvalError::dimension("explanation", dim, e.len()));
    }

    let (base, perturbed): (Vec<f64>, Vec<FeatureVector>) = match reference {
        Reference::Input => (ctx.x.clone(), samples),
        Reference::Output => (ctx.probabilities.clone(), probs),
        Reference::Representation(capability) => representations(ctx, capability, samples)?,
    };

    let p = ctx.norm_order();
    let eps = ctx.settings.epsilon;
    let worst = explanations
        .iter()
        .zip(&perturbed)
        .map(|(e, r)| stability_ratio(&ctx.explanation, e, &base, r, p, eps))
        // NaN propagates; f64::max would drop it.
        .fold(0.0_f64, |acc, r| {
            if acc.is_nan() || r.is_nan() {
                f64::NAN
            } else {
                acc.max(r)
            }
        });

    debug!(metric = %metric, neighbours = explanations.len(), worst, "Stability ratio");
    Ok(worst)
}

/// Hidden representations of `x` followed by those of `samples`.
fn representations(
    ctx: &EvaluationContext,
    capability: &dyn LayerRepresentation,
    samples: Vec<FeatureVector>,
) -> Result<(Vec<f64>, Vec<FeatureVector>)> {
    let layer = ctx.settings.representation_layer;
    let post = ctx.settings.representation_post_activation;

    let mut batch = Vec::with_capacity(samples.len() + 1);
    batch.push(ctx.x.clone());
    batch.extend(samples);
    let mut reps = capability
        .hidden_representation(&batch, layer, post)
        .map_err(EvalError::model)?;
    if reps.len() != batch.len() {
        return Err(EvalError::dimension("representations", batch.len(), reps.len()));
    }
    let base = reps.remove(0);
    Ok((base, reps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_explanations_give_zero() {
        let r = stability_ratio(&[1.0, 2.0], &[1.0, 2.0], &[0.5, 0.5], &[0.6, 0.4], 2.0, 1e-4);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_unchanged_reference_is_floored() {
        let r = stability_ratio(&[1.0], &[2.0], &[3.0], &[3.0], 2.0, 1e-4);
        assert!(r.is_finite());
        assert!((r - 1.0 / 1e-4).abs() < 1e-6);
    }

    #[test]
    fn test_zero_explanation_component_stays_finite() {
        let r = stability_ratio(&[0.0, 1.0], &[0.5, 1.0], &[1.0, 1.0], &[1.1, 1.0], 1.0, 1e-4);
        assert!(r.is_finite());
        assert!(r > 0.0);
    }

    #[test]
    fn test_ratio_value() {
        // explanation changes by 10%, input by 5%
        let r = stability_ratio(&[1.0], &[0.9], &[2.0], &[2.1], 2.0, 1e-4);
        assert!((r - 2.0).abs() < 1e-9);
    }
}
