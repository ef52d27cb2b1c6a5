//! The classifier: an ordered registry of uniquely named layers
//!
//! Layers are looked up by exact name. The registry is immutable once built;
//! inference and explanation only ever borrow it.

use crate::error::ModelError;
use crate::layers::{as_4d, Layer, LayerOp};
use crate::tape::GradientTape;
use crate::Tensor;
use cam_common::ClassLabels;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use tracing::trace;

/// Spatial resolution the classifier expects its input resized to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    #[must_use]
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

/// A layer together with its registry name
#[derive(Debug)]
pub struct NamedLayer {
    pub name: String,
    pub op: LayerOp,
}

impl NamedLayer {
    pub fn new(name: impl Into<String>, op: LayerOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.op.forward(input).map_err(|e| e.in_layer(&self.name))
    }

    pub fn backward(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        if !self.op.is_differentiable() {
            return Err(ModelError::NotDifferentiable {
                layer: self.name.clone(),
                op: self.op.op_name(),
            });
        }
        self.op
            .backward(input, output, grad_output)
            .map_err(|e| e.in_layer(&self.name))
    }
}

/// Binary image classifier producing a single probability
#[derive(Debug)]
pub struct Classifier {
    name: String,
    input: InputShape,
    labels: ClassLabels,
    layers: Vec<NamedLayer>,
}

impl Classifier {
    pub fn new(
        name: impl Into<String>,
        input: InputShape,
        labels: ClassLabels,
        layers: Vec<NamedLayer>,
    ) -> Result<Self, ModelError> {
        if layers.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        if input.height == 0 || input.width == 0 {
            return Err(ModelError::InvalidManifest(format!(
                "input shape must be non-empty, got {}x{}",
                input.height, input.width
            )));
        }
        let mut seen = HashSet::new();
        for layer in &layers {
            if !seen.insert(layer.name.as_str()) {
                return Err(ModelError::DuplicateLayer(layer.name.clone()));
            }
        }
        Ok(Self {
            name: name.into(),
            input,
            labels,
            layers,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn input_shape(&self) -> InputShape {
        self.input
    }

    #[must_use]
    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Replace the stored class names
    #[must_use]
    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn layers(&self) -> &[NamedLayer] {
        &self.layers
    }

    #[must_use]
    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }

    /// Give up the registry, e.g. to rebuild it with a retrained head
    #[must_use]
    pub fn into_layers(self) -> Vec<NamedLayer> {
        self.layers
    }

    /// Index of the layer with exactly this name
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    /// Like [`Classifier::position`], failing with the list of known names
    pub fn require_layer(&self, name: &str) -> Result<usize, ModelError> {
        self.position(name)
            .ok_or_else(|| ModelError::LayerNotFound {
                name: name.to_string(),
                available: self.layer_names(),
            })
    }

    /// The last layer before global pooling, i.e. the final spatial feature map
    #[must_use]
    pub fn feature_layer(&self) -> Option<&str> {
        let pool = self
            .layers
            .iter()
            .position(|l| matches!(l.op, LayerOp::GlobalAveragePooling2d(_)))?;
        pool.checked_sub(1).map(|i| self.layers[i].name.as_str())
    }

    /// Check a batch is `[n, H, W, 3]` for this classifier's input shape
    pub fn check_batch(&self, batch: &Array4<f32>) -> Result<(), ModelError> {
        let (n, h, w, c) = batch.dim();
        if n == 0 || h != self.input.height || w != self.input.width || c != 3 {
            return Err(ModelError::ShapeMismatch {
                op: "input",
                expected: format!("[n, {}, {}, 3]", self.input.height, self.input.width),
                actual: batch.shape().to_vec(),
            });
        }
        Ok(())
    }

    /// Run layers `range` on `input`
    pub fn forward_range(&self, input: Tensor, range: Range<usize>) -> Result<Tensor, ModelError> {
        let layers = self.layers.get(range.clone()).ok_or_else(|| {
            ModelError::InvalidParameters(format!(
                "layer range {:?} out of bounds for {} layers",
                range,
                self.layers.len()
            ))
        })?;
        layers.iter().try_fold(input, |x, layer| {
            let y = layer.forward(&x)?;
            trace!("{} -> {:?}", layer.name, y.shape());
            Ok(y)
        })
    }

    /// Output of the layer at `index` (inclusive) for a checked batch
    pub fn forward_to(&self, batch: &Array4<f32>, index: usize) -> Result<Tensor, ModelError> {
        self.check_batch(batch)?;
        self.forward_range(batch.clone().into_dyn(), 0..index + 1)
    }

    /// Full forward pass
    pub fn forward(&self, batch: &Array4<f32>) -> Result<Tensor, ModelError> {
        self.forward_to(batch, self.layers.len() - 1)
    }

    /// Probabilities for every image of a batch
    pub fn predict_batch(&self, batch: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        let output = self.forward(batch)?;
        probabilities(&output, batch.dim().0)
    }

    /// Probability for a single-image batch (`[1, H, W, 3]`)
    pub fn predict(&self, batch: &Array4<f32>) -> Result<f32, ModelError> {
        if batch.dim().0 != 1 {
            return Err(ModelError::ShapeMismatch {
                op: "input",
                expected: format!("[1, {}, {}, 3]", self.input.height, self.input.width),
                actual: batch.shape().to_vec(),
            });
        }
        Ok(self.predict_batch(batch)?[0])
    }

    /// Run the layers up to and including `index`, then record the remaining
    /// layers on a gradient tape watching that layer's output
    pub fn record_from(
        &self,
        batch: &Array4<f32>,
        index: usize,
    ) -> Result<GradientTape<'_>, ModelError> {
        let watched = self.forward_to(batch, index)?;
        as_4d("feature map", &watched).map_err(|e| e.in_layer(&self.layers[index].name))?;
        GradientTape::record(&self.layers[index + 1..], watched)
    }
}

/// Validate a `[n, 1]` (or `[n]`) output as probabilities in [0, 1]
pub(crate) fn probabilities(output: &Tensor, batch: usize) -> Result<Vec<f32>, ModelError> {
    if output.len() != batch || output.shape().first() != Some(&batch) {
        return Err(ModelError::InvalidOutput(format!(
            "expected one value per image ({batch}), got shape {:?}",
            output.shape()
        )));
    }
    output
        .iter()
        .map(|&p| {
            if p.is_finite() && (0.0..=1.0).contains(&p) {
                Ok(p)
            } else {
                Err(ModelError::InvalidOutput(format!("{p} is outside [0, 1]")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Conv2d, Dense, GlobalAveragePooling2d, Padding};
    use ndarray::{arr1, arr2, Array4};

    fn tiny() -> Classifier {
        let conv = Conv2d::new(
            Array4::from_elem((3, 3, 3, 2), 0.05),
            arr1(&[0.0, 0.1]),
            2,
            Padding::Same,
        )
        .unwrap();
        Classifier::new(
            "tiny",
            InputShape::new(8, 8),
            ClassLabels::new("bright", "dark"),
            vec![
                NamedLayer::new("conv", LayerOp::Conv2d(conv)),
                NamedLayer::new("conv_act", LayerOp::Activation(Activation::Relu)),
                NamedLayer::new("pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
                NamedLayer::new(
                    "logit",
                    LayerOp::Dense(Dense::new(arr2(&[[1.0], [-1.0]]), arr1(&[0.0])).unwrap()),
                ),
                NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_by_name() {
        let model = tiny();
        assert_eq!(model.position("conv_act"), Some(1));
        assert_eq!(model.position("Conv_Act"), None);
        assert_eq!(model.feature_layer(), Some("conv_act"));

        let err = model.require_layer("nonexistent_layer").unwrap_err();
        match err {
            ModelError::LayerNotFound { name, available } => {
                assert_eq!(name, "nonexistent_layer");
                assert_eq!(available.len(), 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Classifier::new(
            "dup",
            InputShape::new(2, 2),
            ClassLabels::default(),
            vec![
                NamedLayer::new("a", LayerOp::Activation(Activation::Relu)),
                NamedLayer::new("a", LayerOp::Activation(Activation::Sigmoid)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateLayer(name) if name == "a"));
    }

    #[test]
    fn test_predict_returns_probability() {
        let model = tiny();
        let p = model.predict(&Array4::from_elem((1, 8, 8, 3), 0.5)).unwrap();
        assert!((0.0..=1.0).contains(&p));

        let probs = model
            .predict_batch(&Array4::from_elem((3, 8, 8, 3), 0.2))
            .unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|&q| (q - probs[0]).abs() < 1e-6));
    }

    #[test]
    fn test_predict_rejects_wrong_shape() {
        let model = tiny();
        let err = model
            .predict(&Array4::zeros((1, 9, 8, 3)))
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { op: "input", .. }));
        let err = model.predict(&Array4::zeros((2, 8, 8, 3))).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_forward_to_exposes_feature_map() {
        let model = tiny();
        let features = model
            .forward_to(&Array4::from_elem((1, 8, 8, 3), 1.0), 1)
            .unwrap();
        assert_eq!(features.shape(), &[1, 4, 4, 2]);
        assert!(features.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_output_must_be_probability() {
        let model = Classifier::new(
            "raw",
            InputShape::new(1, 1),
            ClassLabels::default(),
            vec![
                NamedLayer::new("pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
                NamedLayer::new(
                    "logit",
                    LayerOp::Dense(Dense::new(arr2(&[[4.0], [4.0], [4.0]]), arr1(&[0.0])).unwrap()),
                ),
            ],
        )
        .unwrap();
        let err = model.predict(&Array4::ones((1, 1, 1, 3))).unwrap_err();
        assert!(matches!(err, ModelError::InvalidOutput(_)));
    }
}
