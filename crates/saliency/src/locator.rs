//! Activation-map locator
//!
//! Resolves the explained layer by exact name when the probe is built, so a
//! misconfigured layer name fails before any image is processed.

use crate::SaliencyError;
use cam_model::{Classifier, GradientTape, Layer, LayerOp, ModelError, TapeGradient, Tensor};
use ndarray::{Array3, Array4, ArrayView3, Axis, Ix4};
use tracing::debug;

/// Activations of the explained layer for one image, `height' × width' × channels'`
pub type FeatureMap = Array3<f32>;

/// Sensitivity of the target score to each [`FeatureMap`] entry
pub type GradientField = Array3<f32>;

/// Something that can evaluate an image while watching a feature map
pub trait FeatureProbe {
    type Scope<'s>: GradientScope
    where
        Self: 's;

    /// Evaluate a `1 × H × W × 3` batch, recording what is needed to
    /// differentiate the output with respect to the watched feature map
    fn open(&self, batch: &Array4<f32>) -> Result<Self::Scope<'_>, SaliencyError>;
}

/// One recorded evaluation; consumed by [`GradientScope::gradient`]
pub trait GradientScope {
    /// Classifier output for the recorded batch
    fn probability(&self) -> f32;

    /// The watched feature map and the gradient of the target score with
    /// respect to it, both `[1, h, w, c]`. `seed` is the derivative of the
    /// target score with respect to the probability.
    fn gradient(self, seed: f32) -> Result<(Array4<f32>, Array4<f32>), SaliencyError>;
}

/// Dual-output evaluator over a named classifier layer
#[derive(Debug, Clone)]
pub struct LayerProbe<'m> {
    model: &'m Classifier,
    layer: String,
    index: usize,
}

impl<'m> LayerProbe<'m> {
    /// Find `layer` in `model` and check gradients can flow back to it
    pub fn locate(model: &'m Classifier, layer: &str) -> Result<Self, SaliencyError> {
        let index = model.require_layer(layer)?;
        let suffix = &model.layers()[index + 1..];
        if suffix.is_empty() {
            return Err(SaliencyError::OutputLayer(layer.to_string()));
        }
        // Pooling and dense layers collapse the height and width axes
        let flattened = model.layers()[..=index].iter().any(|l| {
            matches!(
                l.op,
                LayerOp::GlobalAveragePooling2d(_) | LayerOp::Dense(_)
            )
        });
        if flattened {
            return Err(SaliencyError::NotSpatial(layer.to_string()));
        }
        if let Some(blocked) = suffix.iter().find(|l| !l.op.is_differentiable()) {
            return Err(ModelError::NotDifferentiable {
                layer: blocked.name.clone(),
                op: blocked.op.op_name(),
            }
            .into());
        }
        debug!(
            "Explaining layer '{}' ({} of {})",
            layer,
            index + 1,
            model.layers().len()
        );
        Ok(Self {
            model,
            layer: layer.to_string(),
            index,
        })
    }

    /// Probe the model's feature layer (the last layer before global pooling)
    pub fn locate_default(model: &'m Classifier) -> Result<Self, SaliencyError> {
        let layer = model.feature_layer().ok_or(SaliencyError::NoFeatureLayer)?;
        Self::locate(model, layer)
    }

    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    #[must_use]
    pub fn model(&self) -> &'m Classifier {
        self.model
    }

    /// Feature map and probability for a single-image batch
    pub fn evaluate(&self, batch: &Array4<f32>) -> Result<(FeatureMap, f32), SaliencyError> {
        let scope = self.open(batch)?;
        Ok((scope.feature_map()?.to_owned(), scope.probability()))
    }
}

impl<'m> FeatureProbe for LayerProbe<'m> {
    type Scope<'s>
        = LayerScope<'s>
    where
        Self: 's;

    fn open(&self, batch: &Array4<f32>) -> Result<Self::Scope<'_>, SaliencyError> {
        if batch.dim().0 != 1 {
            return Err(SaliencyError::ShapeMismatch {
                expected: "a single-image batch".to_string(),
                actual: batch.shape().to_vec(),
            });
        }
        let tape = self.model.record_from(batch, self.index)?;
        let probability = single_probability(tape.output())?;
        Ok(LayerScope { tape, probability })
    }
}

fn single_probability(output: &Tensor) -> Result<f32, ModelError> {
    match output.iter().copied().collect::<Vec<_>>().as_slice() {
        [p] if p.is_finite() && (0.0..=1.0).contains(p) => Ok(*p),
        _ => Err(ModelError::InvalidOutput(format!(
            "expected a single probability, got shape {:?}",
            output.shape()
        ))),
    }
}

fn into_4d(tensor: Tensor) -> Result<Array4<f32>, SaliencyError> {
    let shape = tensor.shape().to_vec();
    tensor
        .into_dimensionality::<Ix4>()
        .map_err(|_| SaliencyError::ShapeMismatch {
            expected: "[1, height, width, channels]".to_string(),
            actual: shape,
        })
}

/// Recorded evaluation of a [`LayerProbe`]
#[derive(Debug)]
pub struct LayerScope<'m> {
    tape: GradientTape<'m>,
    probability: f32,
}

impl LayerScope<'_> {
    /// Watched activations with the batch axis dropped
    pub fn feature_map(&self) -> Result<ArrayView3<'_, f32>, SaliencyError> {
        let watched = self.tape.watched();
        watched
            .view()
            .into_dimensionality::<Ix4>()
            .map(|view| view.index_axis_move(Axis(0), 0))
            .map_err(|_| SaliencyError::ShapeMismatch {
                expected: "[1, height, width, channels]".to_string(),
                actual: watched.shape().to_vec(),
            })
    }
}

impl GradientScope for LayerScope<'_> {
    fn probability(&self) -> f32 {
        self.probability
    }

    fn gradient(self, seed: f32) -> Result<(Array4<f32>, Array4<f32>), SaliencyError> {
        let seed = Tensor::from_elem(self.tape.output().raw_dim(), seed);
        let TapeGradient { watched, gradient } = self.tape.gradient(seed)?;
        Ok((into_4d(watched)?, into_4d(gradient)?))
    }
}
