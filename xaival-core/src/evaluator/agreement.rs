//! Ground-truth agreement metrics.
//!
//! Rankings order features by absolute importance, ties to the lowest index.
//! Top-k metrics divide by `k` and return 0.0 when `k` is 0.

use crate::error::{EvalError, Result};
use crate::numeric::spearman;
use crate::types::{Metric, rank_by_magnitude};
use std::collections::HashSet;

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn top_k(values: &[f64], k: usize) -> Vec<usize> {
    rank_by_magnitude(values).into_iter().take(k).collect()
}

/// Dispatch a ground-truth metric. Other metrics fail with `UnsupportedMetric`.
pub fn score(metric: Metric, explanation: &[f64], truth: &[f64], k: usize) -> Result<f64> {
    Ok(match metric {
        Metric::Rc => rank_correlation(explanation, truth),
        Metric::Fa => feature_agreement(explanation, truth, k),
        Metric::Ra => rank_agreement(explanation, truth, k),
        Metric::Sa => sign_agreement(explanation, truth, k),
        Metric::Sra => signed_rank_agreement(explanation, truth, k),
        Metric::Pra => pairwise_rank_agreement(explanation, truth),
        Metric::Pgu | Metric::Pgi | Metric::Ris | Metric::Ros | Metric::Rrs => {
            return Err(EvalError::unsupported_metric(metric.name()));
        }
    })
}

/// Spearman correlation between absolute importances.
pub fn rank_correlation(explanation: &[f64], truth: &[f64]) -> f64 {
    let a: Vec<f64> = explanation.iter().map(|v| v.abs()).collect();
    let b: Vec<f64> = truth.iter().map(|v| v.abs()).collect();
    spearman(&a, &b)
}

/// Fraction of the top-k features shared by both rankings.
pub fn feature_agreement(explanation: &[f64], truth: &[f64], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let ours: HashSet<usize> = top_k(explanation, k).into_iter().collect();
    let shared = top_k(truth, k).iter().filter(|i| ours.contains(i)).count();
    shared as f64 / k as f64
}

/// Fraction of top-k rank positions holding the same feature.
pub fn rank_agreement(explanation: &[f64], truth: &[f64], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let matches = top_k(explanation, k)
        .iter()
        .zip(top_k(truth, k))
        .filter(|(a, b)| **a == *b)
        .count();
    matches as f64 / k as f64
}

/// Fraction of shared top-k features that also agree in sign.
pub fn sign_agreement(explanation: &[f64], truth: &[f64], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let ours: HashSet<usize> = top_k(explanation, k).into_iter().collect();
    let agreeing = top_k(truth, k)
        .into_iter()
        .filter(|i| ours.contains(i) && sign(explanation[*i]) == sign(truth[*i]))
        .count();
    agreeing as f64 / k as f64
}

/// Fraction of top-k rank positions holding the same feature with the same sign.
pub fn signed_rank_agreement(explanation: &[f64], truth: &[f64], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let matches = top_k(explanation, k)
        .into_iter()
        .zip(top_k(truth, k))
        .filter(|&(a, b)| a == b && sign(explanation[a]) == sign(truth[b]))
        .count();
    matches as f64 / k as f64
}

/// Fraction of feature pairs whose relative order by magnitude agrees.
/// Fewer than two features score 0.0.
pub fn pairwise_rank_agreement(explanation: &[f64], truth: &[f64]) -> f64 {
    let n = explanation.len().min(truth.len());
    if n < 2 {
        return 0.0;
    }
    let mut agree = 0usize;
    let mut total = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let ours = sign(explanation[i].abs() - explanation[j].abs());
            let theirs = sign(truth[i].abs() - truth[j].abs());
            if ours == theirs {
                agree += 1;
            }
            total += 1;
        }
    }
    agree as f64 / total as f64
}
