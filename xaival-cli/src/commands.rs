//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use xaival_core::config::{config_exists, save_workspace_config, workspace_config_path};
use xaival_core::types::rank_by_magnitude;
use xaival_core::{
    EvaluationContext, EvaluationReport, Evaluator, ExplainerRegistry, FeatureTypes, Metric,
    MetricOutcome, XaivalConfig, context_from_config, load_config, load_model,
};

/// One input point as read from `--input`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InputFile {
    pub features: Vec<f64>,
    #[serde(default)]
    pub label: Option<usize>,
    #[serde(default)]
    pub feature_types: Option<FeatureTypes>,
    #[serde(default)]
    pub ground_truth: Option<Vec<f64>>,
    #[serde(default)]
    pub explanation: Option<Vec<f64>>,
}

impl InputFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid input file {}", path.display()))
    }
}

/// Command-line values that take precedence over the loaded configuration.
#[derive(Debug, Default, Clone)]
pub(crate) struct Overrides {
    pub top_k: Option<usize>,
    pub samples: Option<usize>,
    pub seed: Option<u64>,
    pub max_distance: Option<f64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut XaivalConfig) {
        if let Some(k) = self.top_k {
            config.evaluation.top_k = k;
        }
        if let Some(n) = self.samples {
            config.evaluation.num_samples = n;
        }
        if let Some(seed) = self.seed {
            config.evaluation.seed = Some(seed);
        }
        if let Some(d) = self.max_distance {
            config.perturbation.max_distance = d;
        }
    }
}

pub(crate) fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Evaluate {
            model,
            input,
            metrics,
            top_k,
            samples,
            seed,
            max_distance,
            json,
        } => {
            let overrides = Overrides {
                top_k,
                samples,
                seed,
                max_distance,
            };
            let metrics = parse_metrics(&metrics)?;
            let context = build_context(workspace, &model, &input, &overrides)?;
            let report = Evaluator::new(context).evaluate_all(&metrics);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Explain {
            model,
            input,
            top_k,
        } => {
            let overrides = Overrides {
                top_k,
                ..Overrides::default()
            };
            let context = build_context(workspace, &model, &input, &overrides)?;
            print_explanation(&context);
            Ok(())
        }
        Commands::Metrics => {
            for metric in Metric::ALL {
                let kind = if metric.is_perturbation_based() {
                    "perturbation"
                } else {
                    "ground truth"
                };
                println!("  {:<4} {:<13} {}", metric.name(), kind, metric.description());
            }
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = workspace_config_path(workspace);
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if config_exists(None) {
                tracing::info!("A user-level configuration also exists and will be layered below");
            }
            let written = save_workspace_config(workspace, &XaivalConfig::default())?;
            println!("Wrote default configuration to {}", written.display());
            Ok(())
        }
    }
}

/// Metric names from the command line; every metric when none are given.
pub(crate) fn parse_metrics(names: &[String]) -> anyhow::Result<Vec<Metric>> {
    if names.is_empty() {
        return Ok(Metric::ALL.to_vec());
    }
    let mut metrics = Vec::with_capacity(names.len());
    for name in names {
        let metric: Metric = name.parse()?;
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }
    Ok(metrics)
}

fn build_context(
    workspace: &Path,
    model_path: &Path,
    input_path: &Path,
    overrides: &Overrides,
) -> anyhow::Result<EvaluationContext> {
    let mut config = load_config(Some(workspace), None)?;
    overrides.apply(&mut config);

    let model = load_model(model_path)
        .with_context(|| format!("failed to load model {}", model_path.display()))?;
    let input = InputFile::load(input_path)?;
    tracing::debug!(
        features = input.features.len(),
        label = ?input.label,
        "Loaded input"
    );

    let registry = ExplainerRegistry::with_builtins();
    let mut builder = context_from_config(&config, &registry, model)?.input(input.features);
    if let Some(types) = input.feature_types {
        builder = builder.feature_types(types);
    }
    if let Some(label) = input.label {
        builder = builder.label(label);
    }
    if let Some(gt) = input.ground_truth {
        builder = builder.ground_truth(gt);
    }
    if let Some(explanation) = input.explanation {
        builder = builder.explanation(explanation);
    }
    Ok(builder.build()?)
}

fn print_explanation(context: &EvaluationContext) {
    println!(
        "Model {} predicts class {} (p = {:.4})",
        context.model().name(),
        context.predicted_label(),
        context.probabilities()[context.predicted_label()]
    );
    println!("Explainer: {}", context.explainer().name());
    println!();
    println!("  rank  feature  attribution");
    for (rank, i) in rank_by_magnitude(context.explanation()).into_iter().enumerate() {
        let marker = if context.mask().contains(i) { "*" } else { " " };
        println!(
            "  {:>4}  {:>7}{} {:+.6}",
            rank + 1,
            i,
            marker,
            context.explanation()[i]
        );
    }
    println!();
    println!("Top-{} features: {:?}", context.top_k(), context.mask().indices());
}

fn print_report(report: &EvaluationReport) {
    println!(
        "Model {} / explainer {} / perturbation {}",
        report.model, report.explainer, report.perturbation
    );
    match report.label {
        Some(label) => println!(
            "Label {} (predicted {})",
            label, report.predicted_label
        ),
        None => println!("Predicted label {}", report.predicted_label),
    }
    println!("Top-k features: {:?}", report.top_k);
    println!();
    for (metric, outcome) in &report.results {
        match outcome {
            MetricOutcome::Value(v) => println!("  {:<4} {:>12.6}", metric.name(), v),
            MetricOutcome::Error(e) => println!("  {:<4} {:>12}  {}", metric.name(), "error", e),
        }
    }
    if report.failures() > 0 {
        println!();
        println!("{} metric(s) failed", report.failures());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_metrics_defaults_to_all() {
        assert_eq!(parse_metrics(&[]).unwrap(), Metric::ALL.to_vec());
    }

    #[test]
    fn test_parse_metrics_dedups_and_ignores_case() {
        let names = vec!["pgu".to_string(), "RIS".to_string(), "PGU".to_string()];
        assert_eq!(parse_metrics(&names).unwrap(), vec![Metric::Pgu, Metric::Ris]);
    }

    #[test]
    fn test_parse_metrics_rejects_unknown() {
        let err = parse_metrics(&["XYZ".to_string()]).unwrap_err();
        assert!(err.to_string().contains("XYZ"));
    }

    #[test]
    fn test_input_file_minimal() {
        let input: InputFile = serde_json::from_str(r#"{"features": [0.1, 0.2]}"#).unwrap();
        assert_eq!(input.features, vec![0.1, 0.2]);
        assert!(input.label.is_none());
        assert!(input.feature_types.is_none());
        assert!(input.ground_truth.is_none());
    }

    #[test]
    fn test_input_file_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(
            &path,
            r#"{"features": [1.0, 0.0, 2.5], "label": 1,
                "feature_types": ["c", "d", "c"], "ground_truth": [0.5, -1.0, 0.0]}"#,
        )
        .unwrap();
        let input = InputFile::load(&path).unwrap();
        assert_eq!(input.label, Some(1));
        assert_eq!(input.feature_types.unwrap().len(), 3);
        assert_eq!(input.ground_truth.unwrap(), vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = XaivalConfig::default();
        Overrides {
            top_k: Some(5),
            samples: Some(20),
            seed: Some(7),
            max_distance: Some(1.5),
        }
        .apply(&mut config);
        assert_eq!(config.evaluation.top_k, 5);
        assert_eq!(config.evaluation.num_samples, 20);
        assert_eq!(config.evaluation.seed, Some(7));
        assert_eq!(config.perturbation.max_distance, 1.5);
    }

    #[test]
    fn test_cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "xaival", "evaluate", "-m", "model.json", "-i", "x.json", "--metric", "PGI",
            "--metric", "RIS", "-k", "4", "--seed", "3", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Evaluate {
                metrics,
                top_k,
                seed,
                json,
                ..
            } => {
                assert_eq!(metrics, vec!["PGI".to_string(), "RIS".to_string()]);
                assert_eq!(top_k, Some(4));
                assert_eq!(seed, Some(3));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_build_context_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        std::fs::write(
            &model_path,
            r#"{"kind": "logistic_regression",
                "weights": [[0.0, 0.0, 0.0], [1.0, -2.0, 0.5]], "bias": [0.0, 0.0]}"#,
        )
        .unwrap();
        let input_path = dir.path().join("input.json");
        std::fs::write(&input_path, r#"{"features": [1.0, 0.2, 0.3], "label": 1}"#).unwrap();

        let context = build_context(
            dir.path(),
            &model_path,
            &input_path,
            &Overrides {
                top_k: Some(2),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(context.predicted_label(), 1);
        assert_eq!(context.top_k(), 2);
        assert_eq!(context.mask().indices(), &[1, 0]);
        assert!(context.ground_truth().is_some());
    }
}
