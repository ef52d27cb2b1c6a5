//! Gradient-weighted class-activation explanations
//!
//! The pipeline is split the same way the explanation is computed:
//!
//! - [`locator`]: find the named feature layer and open a scoped gradient
//!   context over it
//! - [`engine`]: reduce gradients to channel weights and form the normalised
//!   saliency map
//! - [`map`]: the saliency map itself and its bilinear resampling
//! - [`palette`] / [`render`]: colour mapping and alpha blending over the
//!   original image
//! - [`explain`]: the path-to-images facade used by the CLI

pub mod engine;
pub mod explain;
pub mod locator;
pub mod map;
pub mod palette;
pub mod render;

use cam_common::ImageError;
use cam_inference::InferenceError;
use cam_model::ModelError;
use thiserror::Error;

pub use engine::{channel_weights, weighted_activation, Saliency, SaliencyEngine, DEFAULT_EPSILON};
pub use explain::{Explainer, Explanation};
pub use locator::{FeatureMap, FeatureProbe, GradientField, GradientScope, LayerProbe, LayerScope};
pub use map::SaliencyMap;
pub use palette::Palette;
pub use render::{blend, RenderedFiles, Renderer, Rendering, DEFAULT_ALPHA};

#[derive(Error, Debug)]
pub enum SaliencyError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Model has no global pooling layer; pass an explicit target layer")]
    NoFeatureLayer,

    #[error("Layer '{0}' is the model output; the explained layer must be followed by the classifier head")]
    OutputLayer(String),

    #[error("Layer '{0}' has no spatial output; explain a convolutional layer before global pooling")]
    NotSpatial(String),

    #[error("Expected {expected}, got shape {actual:?}")]
    ShapeMismatch {
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Alpha must be in [0, 1], got {0}")]
    InvalidAlpha(f32),

    #[error("Failed to write rendering: {0}")]
    Image(#[from] ImageError),
}
