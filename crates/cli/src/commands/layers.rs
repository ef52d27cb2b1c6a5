//! Layer registry listing

use super::{load_model, model_path};
use anyhow::Result;
use cam_common::CamConfig;
use cam_model::Layer;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct LayersCommand {
    /// Classifier manifest (overrides the configured model)
    #[arg(short, long)]
    model: Option<PathBuf>,
}

impl LayersCommand {
    pub fn execute(self, config: &CamConfig) -> Result<()> {
        let model = load_model(&model_path(self.model.as_deref(), config), config)?;
        let feature_layer = model.feature_layer();

        println!(
            "{} (input {}x{}, positive: {}, negative: {})",
            model.name(),
            model.input_shape().width,
            model.input_shape().height,
            model.labels().positive,
            model.labels().negative
        );
        for (index, layer) in model.layers().iter().enumerate() {
            let marker = if Some(layer.name.as_str()) == feature_layer {
                "  <- feature layer"
            } else {
                ""
            };
            println!("{:>3}  {:<24} {}{}", index, layer.name, layer.op.op_name(), marker);
        }
        Ok(())
    }
}
