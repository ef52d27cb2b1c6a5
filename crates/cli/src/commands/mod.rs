//! Subcommand implementations

pub mod evaluate;
pub mod explain;
pub mod layers;
pub mod predict;
pub mod train;

use anyhow::{Context as _, Result};
use cam_common::CamConfig;
use cam_model::Classifier;
use std::path::{Path, PathBuf};
use tracing::info;

/// `--model` if given, else the configured model path
pub(crate) fn model_path(flag: Option<&Path>, config: &CamConfig) -> PathBuf {
    flag.map_or_else(|| config.model.clone(), Path::to_path_buf)
}

/// Load a classifier, applying the configured label override
pub(crate) fn load_model(path: &Path, config: &CamConfig) -> Result<Classifier> {
    let model = Classifier::load(path)
        .with_context(|| format!("Failed to load model {}", path.display()))?;
    info!(
        "Loaded model '{}' ({} layers, input {}x{})",
        model.name(),
        model.layers().len(),
        model.input_shape().width,
        model.input_shape().height
    );
    Ok(match &config.labels {
        Some(labels) => model.with_labels(labels.clone()),
        None => model,
    })
}
