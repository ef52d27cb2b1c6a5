//! Layered binary image classifier
//!
//! A [`Classifier`] is an ordered registry of uniquely named layers ending in a
//! single sigmoid probability. Native layers (convolution, dense, activations,
//! pooling, dropout) support reverse-mode differentiation through a
//! [`GradientTape`]; an optional ONNX stage (feature `onnx`) runs pretrained
//! feature extractors forward-only.

pub mod classifier;
pub mod error;
pub mod layers;
pub mod manifest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tape;

/// Dense tensor; spatial tensors are NHWC
pub type Tensor = ndarray::ArrayD<f32>;

pub use classifier::{Classifier, InputShape, NamedLayer};
pub use error::ModelError;
pub use layers::{
    sigmoid, Activation, Conv2d, Dense, DenseGradients, Dropout, GlobalAveragePooling2d, Layer,
    LayerOp, Padding,
};
pub use manifest::{LayerEntry, LayerSpec, ModelManifest, OnnxSpec, TensorLayout, FORMAT_VERSION};
pub use tape::{GradientTape, TapeGradient};
