//! Saliency explanation of one image

use super::{load_model, model_path};
use anyhow::{Context as _, Result};
use cam_common::CamConfig;
use cam_saliency::{Explainer, Renderer, SaliencyEngine};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ExplainCommand {
    /// Image to explain
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Classifier manifest (overrides the configured model)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Layer whose activations are explained (default: last layer before pooling)
    #[arg(short, long)]
    layer: Option<String>,

    /// Heatmap opacity in the overlay, 0 to 1
    #[arg(long)]
    alpha: Option<f32>,

    /// Directory receiving the rendered images
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

impl ExplainCommand {
    pub fn execute(self, config: &CamConfig) -> Result<()> {
        let model = load_model(&model_path(self.model.as_deref(), config), config)?;
        let layer = self.layer.as_deref().or(config.target_layer.as_deref());
        let renderer = Renderer::new(self.alpha.unwrap_or(config.alpha))?;
        let explainer = Explainer::new(&model, layer)
            .context("Failed to set up explanation layer")?
            .with_engine(SaliencyEngine::new(config.epsilon))
            .with_renderer(renderer);

        let explanation = explainer
            .explain_path(&self.image)
            .with_context(|| format!("Failed to explain {}", self.image.display()))?;

        let output_dir = self.output_dir.unwrap_or_else(|| config.output_dir.clone());
        let stem = self
            .image
            .file_stem()
            .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());
        let files = explanation
            .rendering
            .save(&output_dir, &stem)
            .context("Failed to save explanation images")?;

        println!("{}", explanation.prediction.report_line());
        println!("Heatmap: {}", files.heatmap.display());
        println!("Overlay: {}", files.overlay.display());
        println!("Panel: {}", files.panel.display());
        Ok(())
    }
}
