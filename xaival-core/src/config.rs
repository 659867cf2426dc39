//! Configuration management for xaival.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration
//! is read from `~/.config/xaival/config.toml` and/or `.xaival/config.toml` in
//! the workspace directory.

use crate::error::{EvalError, Result};
use crate::explainer::ExplainerMethod;
use crate::perturbation::PerturbationConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XaivalConfig {
    /// Perturbation generator parameters.
    #[serde(default)]
    pub perturbation: PerturbationConfig,
    /// Evaluator parameters.
    #[serde(default)]
    pub evaluation: EvaluationSettings,
    /// Explanation method and its options.
    #[serde(default)]
    pub explainer: ExplainerMethod,
}

impl XaivalConfig {
    /// Check every numeric parameter before an evaluation is built.
    pub fn validate(&self) -> Result<()> {
        self.perturbation.validate()?;
        self.evaluation.validate()
    }
}

/// Evaluator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// Perturbed samples drawn per metric call.
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    /// Size of the top-k mask.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Floor for relative-change denominators.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Seed for the perturbation source; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Extra sampling rounds allowed to fill the neighbourhood.
    #[serde(default = "default_max_resample_rounds")]
    pub max_resample_rounds: usize,
    /// Keep only neighbours that preserve the predicted label (stability metrics).
    #[serde(default = "default_true")]
    pub require_same_prediction: bool,
    /// Hidden layer used by RRS.
    #[serde(default)]
    pub representation_layer: usize,
    /// Read the RRS layer after its activation.
    #[serde(default = "default_true")]
    pub representation_post_activation: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            num_samples: default_num_samples(),
            top_k: default_top_k(),
            epsilon: default_epsilon(),
            seed: None,
            max_resample_rounds: default_max_resample_rounds(),
            require_same_prediction: true,
            representation_layer: 0,
            representation_post_activation: true,
        }
    }
}

impl EvaluationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(EvalError::invalid_config("num_samples must be at least 1"));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(EvalError::invalid_config(format!(
                "epsilon must be a positive finite number, got {}",
                self.epsilon
            )));
        }
        if self.max_resample_rounds == 0 {
            return Err(EvalError::invalid_config(
                "max_resample_rounds must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_num_samples() -> usize {
    100
}

fn default_top_k() -> usize {
    3
}

fn default_epsilon() -> f64 {
    1e-4
}

fn default_max_resample_rounds() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "xaival", "xaival")
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".xaival").join("config.toml")
}

/// Load configuration with layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&XaivalConfig>,
) -> Result<XaivalConfig> {
    let mut figment = Figment::from(Serialized::defaults(XaivalConfig::default()));

    // User-level config
    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (XAIVAL_EVALUATION__TOP_K, XAIVAL_PERTURBATION__STD_DEV, ...)
    figment = figment.merge(Env::prefixed("XAIVAL_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| EvalError::Config(Box::new(e)))
}

/// Check whether any xaival configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace
        .map(|ws| workspace_config_path(ws).exists())
        .unwrap_or(false)
}

/// Write `config` to the workspace config file, creating `.xaival/` if needed.
pub fn save_workspace_config(workspace: &Path, config: &XaivalConfig) -> Result<PathBuf> {
    let path = workspace_config_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| EvalError::invalid_config(format!("cannot encode config: {e}")))?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "Wrote workspace config");
    Ok(path)
}
