//! cam - binary image classification with Grad-CAM explanations
//!
//! Predicts, explains, evaluates and trains binary classifiers stored as
//! JSON manifests.

use anyhow::{Context as _, Result};
use cam_common::{thread_override, CamConfig};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::evaluate::EvaluateCommand;
use commands::explain::ExplainCommand;
use commands::layers::LayersCommand;
use commands::predict::PredictCommand;
use commands::train::TrainCommand;

#[derive(Parser)]
#[command(
    name = "cam",
    version,
    about = "Binary image classification with gradient-weighted class activation maps",
    after_help = "EXAMPLES:\n  \
                  cam predict --model models/classifier.json cat.jpg dog.jpg\n  \
                  cam explain --layer block5_conv3 --output-dir out cat.jpg\n  \
                  cam evaluate --data datasets/cats_dogs --sample 20 --seed 7\n  \
                  cam train --backbone models/backbone.json --data datasets/cats_dogs --out models/classifier.json\n  \
                  cam layers --model models/classifier.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file (defaults to $CAM_CONFIG, then built-in defaults)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one or more images
    Predict(PredictCommand),

    /// Classify an image and render its saliency heatmap
    Explain(ExplainCommand),

    /// Measure accuracy over a labelled dataset split
    Evaluate(EvaluateCommand),

    /// Train a classification head on top of a frozen backbone
    Train(TrainCommand),

    /// List the layers of a model
    Layers(LayersCommand),
}

fn main() -> Result<()> {
    if let Some(num_threads) = thread_override() {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .ok();
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Layers(_) => Level::WARN,
        _ if cli.verbose => Level::DEBUG,
        _ => Level::INFO,
    };
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    // RUST_LOG wins over -v when set
    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish()),
    };
    result.context("Failed to set tracing subscriber")?;

    let config = CamConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Predict(cmd) => cmd.execute(&config),
        Commands::Explain(cmd) => cmd.execute(&config),
        Commands::Evaluate(cmd) => cmd.execute(&config),
        Commands::Train(cmd) => cmd.execute(&config),
        Commands::Layers(cmd) => cmd.execute(&config),
    }
}
