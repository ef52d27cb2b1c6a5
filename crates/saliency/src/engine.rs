//! Gradient-weighted saliency engine
//!
//! For one image:
//!
//! 1. evaluate the probe, watching the feature map
//! 2. pick the target score for the predicted class (`p` or `1 - p`)
//! 3. differentiate that score with respect to the feature map
//! 4. average the gradient over space, one weight per channel
//! 5. weight and sum the channels at every location
//! 6. clip negatives and normalise to a unit peak
//!
//! The engine never writes to the model; the gradient scope is consumed by
//! the differentiation step and nothing is kept between calls.

use crate::locator::{FeatureProbe, GradientScope};
use crate::map::SaliencyMap;
use crate::SaliencyError;
use cam_common::Decision;
use ndarray::{s, Array1, Array2, Array4, ArrayView1, ArrayView3, Axis};
use tracing::debug;

/// Default normalisation floor
pub const DEFAULT_EPSILON: f32 = 1e-10;

/// Result of one saliency computation
#[derive(Debug, Clone, PartialEq)]
pub struct Saliency {
    /// Map at feature-map resolution
    pub map: SaliencyMap,
    pub probability: f32,
    /// Class whose score was explained
    pub target: Decision,
    pub channel_weights: Array1<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaliencyEngine {
    epsilon: f32,
}

impl Default for SaliencyEngine {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl SaliencyEngine {
    /// Engine treating maxima at or below `epsilon` as "no positive evidence"
    #[must_use]
    pub fn new(epsilon: f32) -> Self {
        Self {
            epsilon: epsilon.max(0.0),
        }
    }

    /// Saliency of the predicted class for a `1 × H × W × 3` batch
    pub fn compute<P: FeatureProbe>(
        &self,
        probe: &P,
        batch: &Array4<f32>,
    ) -> Result<Saliency, SaliencyError> {
        let scope = probe.open(batch)?;
        let probability = scope.probability();
        let target = Decision::from_probability(probability);

        let (features, gradient) = scope.gradient(target.score_gradient())?;
        if features.dim() != gradient.dim() || features.dim().0 != 1 {
            return Err(SaliencyError::ShapeMismatch {
                expected: format!("gradient shaped like the feature map {:?}", features.shape()),
                actual: gradient.shape().to_vec(),
            });
        }
        let features = features.index_axis_move(Axis(0), 0);
        let gradient = gradient.index_axis_move(Axis(0), 0);

        let weights = channel_weights(gradient.view());
        let raw = weighted_activation(features.view(), weights.view());
        let map = SaliencyMap::from_raw(raw, self.epsilon);

        debug!(
            "Saliency: p={:.4} target={} map {}x{} ({} channels){}",
            probability,
            target,
            map.height(),
            map.width(),
            weights.len(),
            if map.is_zero() { ", no positive evidence" } else { "" }
        );

        Ok(Saliency {
            map,
            probability,
            target,
            channel_weights: weights,
        })
    }
}

/// Spatial mean of the gradient for every channel
#[must_use]
pub fn channel_weights(gradient: ArrayView3<'_, f32>) -> Array1<f32> {
    let channels = gradient.dim().2;
    gradient
        .mean_axis(Axis(0))
        .and_then(|rows| rows.mean_axis(Axis(0)))
        .unwrap_or_else(|| Array1::zeros(channels))
}

/// Per-location dot product of the channel vector with `weights`
#[must_use]
pub fn weighted_activation(
    features: ArrayView3<'_, f32>,
    weights: ArrayView1<'_, f32>,
) -> Array2<f32> {
    let (height, width, _) = features.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        features.slice(s![y, x, ..]).dot(&weights)
    })
}
