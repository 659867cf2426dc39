//! xaival CLI: explain a tabular classifier's prediction and score the explanation.
//!
//! Mirrors the notebook workflow: load a pretrained model, compute an
//! explanation for one input, then evaluate faithfulness, stability and
//! ground-truth agreement metrics.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// xaival: stability and faithfulness metrics for feature attributions
#[derive(Parser, Debug)]
#[command(name = "xaival", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds .xaival/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Explain an input and evaluate the explanation
    Evaluate {
        /// Model weights (JSON)
        #[arg(short, long)]
        model: PathBuf,
        /// Input point (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Metric to compute (repeatable); all metrics when omitted
        #[arg(long = "metric")]
        metrics: Vec<String>,
        /// Size of the top-k mask
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Perturbed samples per metric
        #[arg(long)]
        samples: Option<usize>,
        /// Seed for the perturbation source
        #[arg(long)]
        seed: Option<u64>,
        /// Largest accepted perturbation distance
        #[arg(long)]
        max_distance: Option<f64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute and print the explanation of an input
    Explain {
        /// Model weights (JSON)
        #[arg(short, long)]
        model: PathBuf,
        /// Input point (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Size of the top-k mask
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// List supported metrics
    Metrics,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Write the default configuration to .xaival/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "xaival", "xaival")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "xaival.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}
