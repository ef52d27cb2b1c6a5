//! Accuracy over a dataset split

use super::{load_model, model_path};
use anyhow::{Context as _, Result};
use cam_common::{CamConfig, DatasetLayout};
use cam_inference::{BatchEvaluator, InferenceAdapter};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct EvaluateCommand {
    /// Dataset root containing train/, valid/ and test/
    #[arg(short, long, value_name = "ROOT")]
    data: PathBuf,

    /// Classifier manifest (overrides the configured model)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Split to evaluate
    #[arg(long, default_value = "test")]
    split: String,

    /// Evaluate a random sample of this many images instead of the whole split
    #[arg(long)]
    sample: Option<usize>,

    /// Seed for --sample
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write per-image records as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl EvaluateCommand {
    pub fn execute(self, config: &CamConfig) -> Result<()> {
        let model = load_model(&model_path(self.model.as_deref(), config), config)?;
        let dataset = DatasetLayout::discover(&self.data)
            .with_context(|| format!("Failed to read dataset {}", self.data.display()))?;
        let split = dataset.split(&self.split)?;
        let samples = match self.sample {
            Some(count) => split.sample(count, self.seed),
            None => split.samples.clone(),
        };
        info!(
            "Evaluating {} of {} images in split '{}'",
            samples.len(),
            split.len(),
            split.name
        );

        let report = BatchEvaluator::new(InferenceAdapter::new(&model)).evaluate_samples(&samples)?;
        for record in &report.records {
            match (&record.prediction, &record.error) {
                (Some(prediction), _) => println!(
                    "{} (true: {}) {}",
                    record.image.display(),
                    record.true_label,
                    prediction.report_line()
                ),
                (None, Some(error)) => println!("{} failed: {}", record.image.display(), error),
                (None, None) => {}
            }
        }
        println!("{}", report.summary_line());

        if let Some(path) = &self.report {
            let json = serde_json::to_string_pretty(&report.records)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            info!("Wrote evaluation report to {}", path.display());
        }
        Ok(())
    }
}
