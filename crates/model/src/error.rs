//! Error types for the model crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{op}: expected input of shape {expected}, got {actual:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Layer '{name}' not found (available: {})", .available.join(", "))]
    LayerNotFound { name: String, available: Vec<String> },

    #[error("Layer '{layer}' ({op}) has no backward pass; gradients cannot flow through it")]
    NotDifferentiable { layer: String, op: &'static str },

    #[error("Duplicate layer name: {0}")]
    DuplicateLayer(String),

    #[error("Model has no layers")]
    EmptyModel,

    #[error("Model output is not a probability: {0}")]
    InvalidOutput(String),

    #[error("Invalid layer parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid model manifest: {0}")]
    InvalidManifest(String),

    #[error("Layer '{layer}': {source}")]
    InLayer {
        layer: String,
        #[source]
        source: Box<ModelError>,
    },

    #[error("ONNX Runtime error: {0}")]
    Onnx(String),

    #[error("Model uses an ONNX stage but this build has no `onnx` feature")]
    OnnxDisabled,

    #[error("IO error on {path}: {error}")]
    Io {
        path: String,
        error: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    /// Attach the name of the layer that produced this error
    #[must_use]
    pub fn in_layer(self, layer: &str) -> Self {
        match self {
            // Already attributed, or carries its own layer name
            err @ (ModelError::InLayer { .. } | ModelError::NotDifferentiable { .. }) => err,
            err => ModelError::InLayer {
                layer: layer.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// The innermost error, skipping layer attribution
    #[must_use]
    pub fn root(&self) -> &ModelError {
        match self {
            ModelError::InLayer { source, .. } => source.root(),
            err => err,
        }
    }
}
