//! Core data model: feature metadata, top-k masks, and metric names.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ordered feature vector of dimensionality D.
pub type FeatureVector = Vec<f64>;

/// Per-feature importance scores aligned index-for-index with a [`FeatureVector`].
pub type ExplanationVector = Vec<f64>;

/// Semantic type of a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    #[serde(alias = "c")]
    Continuous,
    #[serde(alias = "d")]
    Discrete,
}

/// Feature-type metadata for a whole feature space. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureTypes(Vec<FeatureType>);

impl FeatureTypes {
    pub fn new(types: Vec<FeatureType>) -> Self {
        Self(types)
    }

    /// Every feature continuous.
    pub fn all_continuous(dim: usize) -> Self {
        Self(vec![FeatureType::Continuous; dim])
    }

    /// Parse the compact `"c"` / `"d"` tag notation, e.g. `"ccdc"`.
    pub fn from_tags(tags: &str) -> Result<Self> {
        tags.chars()
            .map(|c| match c {
                'c' | 'C' => Ok(FeatureType::Continuous),
                'd' | 'D' => Ok(FeatureType::Discrete),
                other => Err(EvalError::invalid_config(format!(
                    "unknown feature type tag '{other}'"
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<FeatureType> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureType> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[FeatureType] {
        &self.0
    }

    /// Fail with `DimensionMismatch` unless this metadata describes `dim` features.
    pub fn check_dim(&self, dim: usize) -> Result<()> {
        if self.0.len() != dim {
            return Err(EvalError::dimension("feature types", dim, self.0.len()));
        }
        Ok(())
    }
}

/// Indices of the k most important features of an explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKMask {
    /// Selected indices, ordered from most to least important.
    indices: Vec<usize>,
    /// Membership flags, one per feature.
    flags: Vec<bool>,
}

impl TopKMask {
    /// Ranked indices, most important first.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn k(&self) -> usize {
        self.indices.len()
    }

    pub fn dim(&self) -> usize {
        self.flags.len()
    }

    /// Per-feature membership flags.
    pub fn as_flags(&self) -> &[bool] {
        &self.flags
    }

    /// Flags for the complement set (features outside the top-k).
    pub fn complement_flags(&self) -> Vec<bool> {
        self.flags.iter().map(|f| !f).collect()
    }
}

/// Order feature indices by descending absolute importance, ties to the lowest index.
pub fn rank_by_magnitude(explanation: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..explanation.len()).collect();
    order.sort_by(|&a, &b| {
        explanation[b]
            .abs()
            .total_cmp(&explanation[a].abs())
            .then(a.cmp(&b))
    });
    order
}

/// Select the `k` indices with the largest absolute explanation value.
///
/// Ties are broken by lowest index. `k` larger than the explanation length is
/// rejected.
pub fn generate_mask(explanation: &[f64], k: usize) -> Result<TopKMask> {
    if k > explanation.len() {
        return Err(EvalError::invalid_config(format!(
            "top_k {} exceeds feature count {}",
            k,
            explanation.len()
        )));
    }
    let indices: Vec<usize> = rank_by_magnitude(explanation).into_iter().take(k).collect();
    let mut flags = vec![false; explanation.len()];
    for &i in &indices {
        flags[i] = true;
    }
    Ok(TopKMask { indices, flags })
}

/// Metric names understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    /// Prediction gap on unimportant features.
    Pgu,
    /// Prediction gap on important features.
    Pgi,
    /// Relative input stability.
    Ris,
    /// Relative output stability.
    Ros,
    /// Relative representation stability.
    Rrs,
    /// Rank correlation with ground truth.
    Rc,
    /// Feature agreement.
    Fa,
    /// Rank agreement.
    Ra,
    /// Sign agreement.
    Sa,
    /// Signed rank agreement.
    Sra,
    /// Pairwise rank agreement.
    Pra,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Pgu,
        Metric::Pgi,
        Metric::Ris,
        Metric::Ros,
        Metric::Rrs,
        Metric::Rc,
        Metric::Fa,
        Metric::Ra,
        Metric::Sa,
        Metric::Sra,
        Metric::Pra,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pgu => "PGU",
            Self::Pgi => "PGI",
            Self::Ris => "RIS",
            Self::Ros => "ROS",
            Self::Rrs => "RRS",
            Self::Rc => "RC",
            Self::Fa => "FA",
            Self::Ra => "RA",
            Self::Sa => "SA",
            Self::Sra => "SRA",
            Self::Pra => "PRA",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Pgu => "Prediction gap when perturbing features outside the top-k (lower is better)",
            Self::Pgi => "Prediction gap when perturbing the top-k features (higher is better)",
            Self::Ris => "Worst-case explanation change relative to input change (lower is better)",
            Self::Ros => "Worst-case explanation change relative to output change (lower is better)",
            Self::Rrs => {
                "Worst-case explanation change relative to hidden representation change (lower is better)"
            }
            Self::Rc => "Spearman rank correlation with ground-truth importance",
            Self::Fa => "Top-k feature overlap with ground truth",
            Self::Ra => "Top-k rank position agreement with ground truth",
            Self::Sa => "Top-k feature overlap with matching sign",
            Self::Sra => "Top-k rank position agreement with matching sign",
            Self::Pra => "Fraction of feature pairs ordered the same as ground truth",
        }
    }

    /// Whether the metric draws a perturbation sample.
    pub fn is_perturbation_based(self) -> bool {
        matches!(
            self,
            Self::Pgu | Self::Pgi | Self::Ris | Self::Ros | Self::Rrs
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Metric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EvalError::unsupported_metric(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_mask_picks_largest_magnitudes() {
        let mask = generate_mask(&[0.1, -0.9, 0.3, 0.5], 2).unwrap();
        assert_eq!(mask.indices(), &[1, 3]);
        assert_eq!(mask.as_flags(), &[false, true, false, true]);
        assert!(mask.contains(1));
        assert!(!mask.contains(0));
    }

    #[test]
    fn test_generate_mask_ties_prefer_lower_index() {
        let mask = generate_mask(&[0.5, -0.5, 0.5, 0.1], 2).unwrap();
        assert_eq!(mask.indices(), &[0, 1]);
    }

    #[test]
    fn test_rank_by_magnitude_is_total_with_nan() {
        assert_eq!(rank_by_magnitude(&[0.5, f64::NAN, -2.0, 0.1]), vec![1, 2, 0, 3]);

        let long: Vec<f64> = (0..200)
            .map(|i| if i % 7 == 0 { f64::NAN } else { (i as f64 * 0.37).sin() })
            .collect();
        let order = rank_by_magnitude(&long);
        let mut seen = order.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
        // every NaN ranks ahead of every finite value
        let nan_count = long.iter().filter(|v| v.is_nan()).count();
        assert!(order[..nan_count].iter().all(|&i| long[i].is_nan()));
        assert_eq!(order, rank_by_magnitude(&long));
    }

    #[test]
    fn test_generate_mask_rejects_oversized_k() {
        assert!(matches!(
            generate_mask(&[1.0, 2.0], 3),
            Err(EvalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_generate_mask_zero_k() {
        let mask = generate_mask(&[1.0, 2.0], 0).unwrap();
        assert_eq!(mask.k(), 0);
        assert_eq!(mask.complement_flags(), vec![true, true]);
    }

    #[test]
    fn test_metric_parse_is_case_insensitive() {
        assert_eq!("pgi".parse::<Metric>().unwrap(), Metric::Pgi);
        assert_eq!(" SRA ".parse::<Metric>().unwrap(), Metric::Sra);
        assert!(matches!(
            "bogus_metric".parse::<Metric>(),
            Err(EvalError::UnsupportedMetric { .. })
        ));
    }

    #[test]
    fn test_feature_types_from_tags() {
        let types = FeatureTypes::from_tags("cdc").unwrap();
        assert_eq!(types.len(), 3);
        assert_eq!(types.get(1), Some(FeatureType::Discrete));
        assert!(FeatureTypes::from_tags("cx").is_err());
    }

    #[test]
    fn test_feature_types_serde_aliases() {
        let types: FeatureTypes = serde_json::from_str(r#"["c", "d", "continuous"]"#).unwrap();
        assert_eq!(
            types.as_slice(),
            &[
                FeatureType::Continuous,
                FeatureType::Discrete,
                FeatureType::Continuous
            ]
        );
    }
}
