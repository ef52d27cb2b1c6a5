//! Scoped reverse-mode differentiation over a suffix of the classifier
//!
//! A [`GradientTape`] watches one intermediate tensor, records every
//! activation computed after it, and is consumed by [`GradientTape::gradient`].
//! Nothing outlives the call, so repeated explanations never share state.

use crate::classifier::NamedLayer;
use crate::error::ModelError;
use crate::layers::Layer;
use crate::Tensor;
use tracing::trace;

/// Activations recorded between a watched tensor and the model output
#[derive(Debug)]
pub struct GradientTape<'a> {
    layers: &'a [NamedLayer],
    watched: Tensor,
    activations: Vec<Tensor>,
}

/// The watched tensor and the gradient of the seeded output with respect to it
#[derive(Debug, Clone)]
pub struct TapeGradient {
    pub watched: Tensor,
    pub gradient: Tensor,
}

impl<'a> GradientTape<'a> {
    /// Run `layers` on `watched`, keeping every intermediate output
    pub fn record(layers: &'a [NamedLayer], watched: Tensor) -> Result<Self, ModelError> {
        if let Some(blocked) = layers.iter().find(|l| !l.op.is_differentiable()) {
            return Err(ModelError::NotDifferentiable {
                layer: blocked.name.clone(),
                op: blocked.op.op_name(),
            });
        }

        let mut activations: Vec<Tensor> = Vec::with_capacity(layers.len());
        for layer in layers {
            let input = activations.last().unwrap_or(&watched);
            let output = layer.forward(input)?;
            trace!("tape: {} -> {:?}", layer.name, output.shape());
            activations.push(output);
        }

        Ok(Self {
            layers,
            watched,
            activations,
        })
    }

    #[must_use]
    pub fn watched(&self) -> &Tensor {
        &self.watched
    }

    /// Final recorded output (the watched tensor for an empty suffix)
    #[must_use]
    pub fn output(&self) -> &Tensor {
        self.activations.last().unwrap_or(&self.watched)
    }

    /// Back-propagate `seed` (shaped like [`GradientTape::output`]) to the
    /// watched tensor
    pub fn gradient(self, seed: Tensor) -> Result<TapeGradient, ModelError> {
        if seed.shape() != self.output().shape() {
            return Err(ModelError::ShapeMismatch {
                op: "gradient seed",
                expected: format!("{:?}", self.output().shape()),
                actual: seed.shape().to_vec(),
            });
        }

        let mut grad = seed;
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let input = if i == 0 {
                &self.watched
            } else {
                &self.activations[i - 1]
            };
            grad = layer.backward(input, &self.activations[i], &grad)?;
        }

        Ok(TapeGradient {
            watched: self.watched,
            gradient: grad,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Dense, GlobalAveragePooling2d, LayerOp};
    use ndarray::{arr1, arr2, IxDyn};

    fn head() -> Vec<NamedLayer> {
        vec![
            NamedLayer::new("pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
            NamedLayer::new(
                "logit",
                LayerOp::Dense(Dense::new(arr2(&[[2.0], [-1.0]]), arr1(&[0.0])).unwrap()),
            ),
        ]
    }

    #[test]
    fn test_gradient_of_linear_head() {
        let layers = head();
        let watched = Tensor::ones(IxDyn(&[1, 2, 2, 2]));
        let tape = GradientTape::record(&layers, watched).unwrap();
        assert_eq!(tape.output().shape(), &[1, 1]);
        assert!((tape.output()[[0, 0]] - 1.0).abs() < 1e-6);

        let result = tape.gradient(Tensor::ones(IxDyn(&[1, 1]))).unwrap();
        assert_eq!(result.gradient.shape(), &[1, 2, 2, 2]);
        // d(mean)/dx = 1/4, times the dense weight of the channel
        for (idx, &g) in result.gradient.indexed_iter() {
            let expected = if idx[3] == 0 { 0.5 } else { -0.25 };
            assert!((g - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_negative_seed_flips_gradient() {
        let layers = head();
        let watched = Tensor::from_elem(IxDyn(&[1, 2, 2, 2]), 0.3);
        let up = GradientTape::record(&layers, watched.clone())
            .unwrap()
            .gradient(Tensor::ones(IxDyn(&[1, 1])))
            .unwrap();
        let down = GradientTape::record(&layers, watched)
            .unwrap()
            .gradient(Tensor::from_elem(IxDyn(&[1, 1]), -1.0))
            .unwrap();
        for (a, b) in up.gradient.iter().zip(down.gradient.iter()) {
            assert_eq!(*a, -*b);
        }
    }

    #[test]
    fn test_sigmoid_output_gradient() {
        let mut layers = head();
        layers.push(NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)));
        let tape = GradientTape::record(&layers, Tensor::zeros(IxDyn(&[1, 1, 1, 2]))).unwrap();
        let result = tape.gradient(Tensor::ones(IxDyn(&[1, 1]))).unwrap();
        // sigmoid'(0) = 0.25
        assert!((result.gradient[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((result.gradient[[0, 0, 0, 1]] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_seed_shape_checked() {
        let layers = head();
        let tape = GradientTape::record(&layers, Tensor::ones(IxDyn(&[1, 2, 2, 2]))).unwrap();
        let err = tape.gradient(Tensor::ones(IxDyn(&[2, 1]))).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { op: "gradient seed", .. }));
    }

    #[test]
    fn test_empty_suffix_passes_seed_through() {
        let tape = GradientTape::record(&[], Tensor::ones(IxDyn(&[1, 3]))).unwrap();
        let seed = Tensor::from_elem(IxDyn(&[1, 3]), 2.0);
        let result = tape.gradient(seed.clone()).unwrap();
        assert_eq!(result.gradient, seed);
    }
}
