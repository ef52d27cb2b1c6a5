//! Head training for binary classifiers
//!
//! Freezes a convolutional feature extractor, pools its output and fits a
//! small dense head with Adam on binary cross-entropy. The result is a
//! complete [`Classifier`](cam_model::Classifier) that can be saved and
//! explained like any other.

pub mod features;
pub mod head;
pub mod optim;
pub mod trainer;

use cam_common::{ConfigError, DatasetError};
use cam_inference::InferenceError;
use cam_model::ModelError;
use thiserror::Error;

pub use features::{extract_features, FeatureSet};
pub use head::{attach_head, binary_cross_entropy, Head, HeadSlots, StepStats};
pub use optim::{Adam, AdamSlot};
pub use trainer::{EpochStats, HeadTrainer, TrainingOutcome};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid backbone: {0}")]
    InvalidBackbone(String),

    #[error("No usable images in split '{0}'")]
    EmptySplit(String),
}
