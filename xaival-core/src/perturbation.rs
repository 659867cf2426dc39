//! Perturbation generators for tabular feature vectors.
//!
//! Continuous features receive additive Gaussian noise. Discrete features are
//! flipped with probability `flip_percentage`: the generic [`NormalPerturbation`]
//! treats them as binary (`|v - b|` with `b ~ Bernoulli(flip)`), while
//! [`CategoricalPerturbation`] knows each feature's category count and moves to
//! a uniformly chosen *other* category. No clipping or projection is applied.
//!
//! The strategy is chosen once, from [`PerturbationStrategy`], by
//! [`build_perturber`].

use crate::error::{EvalError, Result};
use crate::types::{FeatureType, FeatureTypes, FeatureVector};
use rand::{Rng, RngCore};
use rand_distr::{Bernoulli, Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which perturbation generator to use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerturbationStrategy {
    /// Gaussian noise plus binary flips.
    #[default]
    Normal,
    /// Gaussian noise plus flips among explicit per-feature categories.
    Categorical {
        /// Category count per feature; ignored for continuous features.
        categories: Vec<usize>,
    },
}

/// Perturbation parameters. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbationConfig {
    /// Generator variant.
    #[serde(default)]
    pub strategy: PerturbationStrategy,
    /// Mean of the Gaussian noise added to continuous features.
    #[serde(default)]
    pub mean: f64,
    /// Standard deviation of the Gaussian noise.
    #[serde(default = "default_std_dev")]
    pub std_dev: f64,
    /// Probability of flipping a discrete feature.
    #[serde(default = "default_flip_percentage")]
    pub flip_percentage: f64,
    /// Largest accepted L_p distance between a perturbed sample and its origin.
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
    /// The `p` of every L_p norm used by the evaluator (`inf` allowed).
    #[serde(default = "default_norm_order")]
    pub norm_order: f64,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            strategy: PerturbationStrategy::default(),
            mean: 0.0,
            std_dev: default_std_dev(),
            flip_percentage: default_flip_percentage(),
            max_distance: default_max_distance(),
            norm_order: default_norm_order(),
        }
    }
}

impl PerturbationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.mean.is_finite() {
            return Err(EvalError::invalid_config("perturbation mean must be finite"));
        }
        if !self.std_dev.is_finite() || self.std_dev < 0.0 {
            return Err(EvalError::invalid_config(format!(
                "perturbation std_dev must be a finite non-negative number, got {}",
                self.std_dev
            )));
        }
        if !(0.0..=1.0).contains(&self.flip_percentage) {
            return Err(EvalError::invalid_config(format!(
                "flip_percentage must lie in [0, 1], got {}",
                self.flip_percentage
            )));
        }
        if self.max_distance.is_nan() || self.max_distance <= 0.0 {
            return Err(EvalError::invalid_config(format!(
                "max_distance must be positive, got {}",
                self.max_distance
            )));
        }
        if self.norm_order.is_nan() || self.norm_order < 1.0 {
            return Err(EvalError::invalid_config(format!(
                "norm_order must be >= 1, got {}",
                self.norm_order
            )));
        }
        Ok(())
    }
}

fn default_std_dev() -> f64 {
    0.05
}

fn default_flip_percentage() -> f64 {
    0.03
}

fn default_max_distance() -> f64 {
    0.4
}

fn default_norm_order() -> f64 {
    2.0
}

/// A perturbation generator.
///
/// Implementations must be usable from several threads at once; all
/// randomness comes from the caller's `rng`.
pub trait Perturber: Send + Sync {
    /// Short identifier of the strategy.
    fn name(&self) -> &str;

    /// The parameters this generator was built with.
    fn config(&self) -> &PerturbationConfig;

    /// Draw `num_samples` neighbours of `x`. Features flagged in `fixed` keep
    /// their original value in every sample.
    fn perturb_masked(
        &self,
        x: &[f64],
        feature_types: &FeatureTypes,
        fixed: &[bool],
        num_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<FeatureVector>>;

    /// Draw `num_samples` neighbours of `x`, perturbing every feature.
    fn perturb(
        &self,
        x: &[f64],
        feature_types: &FeatureTypes,
        num_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<FeatureVector>> {
        let fixed = vec![false; x.len()];
        self.perturb_masked(x, feature_types, &fixed, num_samples, rng)
    }
}

/// Build the generator selected by `config.strategy`.
pub fn build_perturber(config: &PerturbationConfig) -> Result<Arc<dyn Perturber>> {
    config.validate()?;
    let perturber: Arc<dyn Perturber> = match &config.strategy {
        PerturbationStrategy::Normal => Arc::new(NormalPerturbation::new(config.clone())?),
        PerturbationStrategy::Categorical { categories } => Arc::new(
            CategoricalPerturbation::new(config.clone(), categories.clone())?,
        ),
    };
    tracing::debug!(strategy = perturber.name(), "Built perturbation generator");
    Ok(perturber)
}

/// Noise sources shared by both strategies.
struct NoiseSources {
    gaussian: Normal<f64>,
    flip: Bernoulli,
}

impl NoiseSources {
    fn new(config: &PerturbationConfig) -> Result<Self> {
        let gaussian = Normal::new(config.mean, config.std_dev)
            .map_err(|e| EvalError::invalid_config(format!("gaussian noise: {e}")))?;
        let flip = Bernoulli::new(config.flip_percentage)
            .map_err(|e| EvalError::invalid_config(format!("flip probability: {e}")))?;
        Ok(Self { gaussian, flip })
    }
}

fn check_inputs(x: &[f64], feature_types: &FeatureTypes, fixed: &[bool]) -> Result<()> {
    feature_types.check_dim(x.len())?;
    if fixed.len() != x.len() {
        return Err(EvalError::dimension("feature mask", x.len(), fixed.len()));
    }
    Ok(())
}

/// Generate samples, delegating discrete features to `flip_discrete`.
fn generate<F>(
    x: &[f64],
    feature_types: &FeatureTypes,
    fixed: &[bool],
    num_samples: usize,
    noise: &NoiseSources,
    rng: &mut dyn RngCore,
    mut flip_discrete: F,
) -> Vec<FeatureVector>
where
    F: FnMut(usize, f64, &mut dyn RngCore) -> f64,
{
    let mut samples = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let mut sample = x.to_vec();
        for (i, feature_type) in feature_types.iter().enumerate() {
            if fixed[i] {
                continue;
            }
            match feature_type {
                FeatureType::Continuous => sample[i] += noise.gaussian.sample(rng),
                FeatureType::Discrete => {
                    if noise.flip.sample(rng) {
                        sample[i] = flip_discrete(i, x[i], rng);
                    }
                }
            }
        }
        samples.push(sample);
    }
    samples
}

/// Generic generator: Gaussian noise and binary flips.
pub struct NormalPerturbation {
    config: PerturbationConfig,
    noise: NoiseSources,
}

impl NormalPerturbation {
    pub fn new(config: PerturbationConfig) -> Result<Self> {
        let noise = NoiseSources::new(&config)?;
        Ok(Self { config, noise })
    }
}

impl Perturber for NormalPerturbation {
    fn name(&self) -> &str {
        "normal"
    }

    fn config(&self) -> &PerturbationConfig {
        &self.config
    }

    fn perturb_masked(
        &self,
        x: &[f64],
        feature_types: &FeatureTypes,
        fixed: &[bool],
        num_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<FeatureVector>> {
        check_inputs(x, feature_types, fixed)?;
        // Binary complement: |v - 1|.
        Ok(generate(
            x,
            feature_types,
            fixed,
            num_samples,
            &self.noise,
            rng,
            |_, value, _| (value - 1.0).abs(),
        ))
    }
}

/// Category-aware generator for discrete features with known category counts.
///
/// Discrete values are expected to be encoded as `0..n`. A flip moves a valid
/// value to one of the other `n - 1` categories uniformly; an out-of-range
/// value is redrawn uniformly over all `n`. Features with fewer than two
/// categories never change.
pub struct CategoricalPerturbation {
    config: PerturbationConfig,
    noise: NoiseSources,
    categories: Vec<usize>,
}

impl CategoricalPerturbation {
    pub fn new(config: PerturbationConfig, categories: Vec<usize>) -> Result<Self> {
        let noise = NoiseSources::new(&config)?;
        Ok(Self {
            config,
            noise,
            categories,
        })
    }

    pub fn categories(&self) -> &[usize] {
        &self.categories
    }
}

fn flip_category(value: f64, count: usize, rng: &mut dyn RngCore) -> f64 {
    if count < 2 {
        return value;
    }
    let is_valid = value.fract() == 0.0 && value >= 0.0 && (value as usize) < count;
    if !is_valid {
        return rng.gen_range(0..count) as f64;
    }
    let current = value as usize;
    let mut next = rng.gen_range(0..count - 1);
    if next >= current {
        next += 1;
    }
    next as f64
}

impl Perturber for CategoricalPerturbation {
    fn name(&self) -> &str {
        "categorical"
    }

    fn config(&self) -> &PerturbationConfig {
        &self.config
    }

    fn perturb_masked(
        &self,
        x: &[f64],
        feature_types: &FeatureTypes,
        fixed: &[bool],
        num_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<FeatureVector>> {
        check_inputs(x, feature_types, fixed)?;
        if self.categories.len() != x.len() {
            return Err(EvalError::dimension(
                "category counts",
                x.len(),
                self.categories.len(),
            ));
        }
        let categories = &self.categories;
        Ok(generate(
            x,
            feature_types,
            fixed,
            num_samples,
            &self.noise,
            rng,
            |i, value, rng| flip_category(value, categories[i], rng),
        ))
    }
}
