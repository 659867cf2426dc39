//! Prediction-gap faithfulness metrics (PGU, PGI).
//!
//! Both perturb one side of the top-k split while holding the other at `x`,
//! then average `|p(x)[ŷ] - p(x')[ŷ]|` over the neighbourhood, where ŷ is the
//! label predicted at `x`. For PGU the top-k features are held fixed; for PGI
//! everything outside the top-k is.

use super::EvaluationContext;
use crate::error::Result;
use crate::numeric::mean;
use crate::types::Metric;
use rand::RngCore;

/// Mean absolute change of the predicted-class probability when only the
/// features not flagged in `fixed` are perturbed.
pub fn prediction_gap(
    ctx: &EvaluationContext,
    metric: Metric,
    fixed: &[bool],
    rng: &mut dyn RngCore,
) -> Result<f64> {
    let target = ctx.predicted_label;
    let reference = ctx.probabilities[target];

    let samples = ctx.sample_neighbourhood(metric, fixed, rng)?;
    let probs = ctx.predict_batch(&samples)?;
    let gaps: Vec<f64> = probs
        .iter()
        .map(|row| (reference - row[target]).abs())
        .collect();
    Ok(mean(&gaps))
}
