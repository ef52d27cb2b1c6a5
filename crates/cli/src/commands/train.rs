//! Head training over a frozen backbone

use anyhow::{Context as _, Result};
use cam_common::{CamConfig, DatasetLayout, TrainingConfig};
use cam_model::Classifier;
use cam_training::HeadTrainer;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct TrainCommand {
    /// Feature extractor manifest (no pooling or head layers)
    #[arg(short, long)]
    backbone: PathBuf,

    /// Dataset root containing train/, valid/ and test/
    #[arg(short, long, value_name = "ROOT")]
    data: PathBuf,

    /// Where to write the trained classifier
    #[arg(short, long)]
    out: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Width of the hidden dense layer
    #[arg(long)]
    hidden_units: Option<usize>,

    #[arg(long)]
    dropout: Option<f32>,

    /// Seed for initialisation, shuffling and dropout
    #[arg(long)]
    seed: Option<u64>,

    /// Write per-epoch metrics as JSON
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,
}

impl TrainCommand {
    fn training_config(&self, base: &TrainingConfig) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs.unwrap_or(base.epochs),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            hidden_units: self.hidden_units.unwrap_or(base.hidden_units),
            dropout: self.dropout.unwrap_or(base.dropout),
            seed: self.seed.unwrap_or(base.seed),
        }
    }

    pub fn execute(self, config: &CamConfig) -> Result<()> {
        let trainer = HeadTrainer::new(self.training_config(&config.training))?;
        let backbone = Classifier::load(&self.backbone)
            .with_context(|| format!("Failed to load backbone {}", self.backbone.display()))?;
        let dataset = DatasetLayout::discover(&self.data)
            .with_context(|| format!("Failed to read dataset {}", self.data.display()))?;

        let outcome = trainer.train(backbone, &dataset).context("Training failed")?;

        let out = self.out.unwrap_or_else(|| config.model.clone());
        outcome
            .model
            .save(&out)
            .with_context(|| format!("Failed to save model {}", out.display()))?;
        info!("Saved trained model to {}", out.display());

        if let Some(path) = &self.history {
            std::fs::write(path, serde_json::to_string_pretty(&outcome.history)?)
                .with_context(|| format!("Failed to write history {}", path.display()))?;
        }
        if let Some(last) = outcome.history.last() {
            println!(
                "Trained {} epochs: loss {:.4}, accuracy {:.4}",
                last.epoch, last.loss, last.accuracy
            );
        }
        Ok(())
    }
}
