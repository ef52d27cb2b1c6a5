//! Single-image classification

use super::{load_model, model_path};
use anyhow::Result;
use cam_common::CamConfig;
use cam_inference::InferenceAdapter;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
pub struct PredictCommand {
    /// Images to classify
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Classifier manifest (overrides the configured model)
    #[arg(short, long)]
    model: Option<PathBuf>,
}

impl PredictCommand {
    pub fn execute(self, config: &CamConfig) -> Result<()> {
        let model = load_model(&model_path(self.model.as_deref(), config), config)?;
        let adapter = InferenceAdapter::new(&model);

        let mut failed = 0;
        for image in &self.images {
            match adapter.predict_path(image) {
                Ok(prediction) => {
                    info!("{}", image.display());
                    println!("{}", prediction.report_line());
                }
                Err(e) => {
                    warn!("Skipping {}: {}", image.display(), e);
                    failed += 1;
                }
            }
        }

        if failed == self.images.len() {
            anyhow::bail!("No image could be classified");
        }
        Ok(())
    }
}
