//! # xaival-core: Evaluating Feature-Attribution Explanations
//!
//! This crate scores per-feature explanations of tabular classifiers by
//! perturbing the explained input, re-querying the model and explainer, and
//! aggregating the differences into scalar metrics:
//!
//! 1. **Faithfulness**: prediction gaps on unimportant / important features (PGU, PGI)
//! 2. **Stability**: relative input / output / representation stability (RIS, ROS, RRS)
//! 3. **Ground-truth agreement**: RC, FA, RA, SA, SRA, PRA, for models that
//!    know their true feature importance
//!
//! Models and explainers are collaborators behind the [`Model`] and
//! [`Explainer`] traits. Evaluation is synchronous: each metric call blocks
//! until its sampling, inference and re-explanation finish.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod explainer;
pub mod model;
pub mod numeric;
pub mod perturbation;
pub mod types;

pub use config::{EvaluationSettings, XaivalConfig, load_config};
pub use error::{CollaboratorError, EvalError, Result};
pub use evaluator::{
    EvaluationContext, EvaluationContextBuilder, EvaluationReport, Evaluator, MetricOutcome,
};
pub use explainer::{Explainer, ExplainerMethod, ExplainerRegistry};
pub use model::{GroundTruthImportance, LayerRepresentation, Model, ModelSpec, load_model};
pub use perturbation::{
    CategoricalPerturbation, NormalPerturbation, PerturbationConfig, PerturbationStrategy,
    Perturber, build_perturber,
};
pub use types::{
    ExplanationVector, FeatureType, FeatureTypes, FeatureVector, Metric, TopKMask, generate_mask,
};

use std::sync::Arc;

/// Start an evaluation context from a loaded configuration.
///
/// The explainer is instantiated from `config.explainer` through `registry`
/// and the perturbation strategy from `config.perturbation`; the caller adds
/// the input point and any per-call overrides before building.
pub fn context_from_config(
    config: &XaivalConfig,
    registry: &ExplainerRegistry,
    model: Arc<dyn Model>,
) -> Result<EvaluationContextBuilder> {
    config.validate()?;
    let explainer = registry.build(&config.explainer, Arc::clone(&model))?;
    let perturber = build_perturber(&config.perturbation)?;
    Ok(EvaluationContext::builder(model, explainer, perturber).config(config))
}
