//! Trainable classification head over pooled backbone features
//!
//! `global_average_pooling2d → dense(hidden, relu) → dropout → dense(1) → sigmoid`

use crate::optim::{Adam, AdamSlot};
use crate::TrainingError;
use cam_common::{ClassLabels, TrainingConfig, DECISION_THRESHOLD};
use cam_model::{
    Activation, Classifier, Dense, Dropout, GlobalAveragePooling2d, Layer, LayerOp, ModelError,
    NamedLayer, Tensor,
};
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};

pub const POOL_LAYER: &str = "avg_pool";
pub const HIDDEN_LAYER: &str = "head_dense";
pub const HIDDEN_ACTIVATION_LAYER: &str = "head_dense_act";
pub const DROPOUT_LAYER: &str = "head_dropout";
pub const LOGIT_LAYER: &str = "predictions";
pub const OUTPUT_LAYER: &str = "output";

/// Clamp for probabilities inside the log of the loss
const PROB_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq)]
pub struct Head {
    pub hidden: Dense,
    pub dropout: Dropout,
    pub output: Dense,
}

/// Loss and correct count over one mini-batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    pub loss: f32,
    pub correct: usize,
}

/// Adam moments for every head parameter
#[derive(Debug, Clone)]
pub struct HeadSlots {
    hidden_weights: AdamSlot<Ix2>,
    hidden_bias: AdamSlot<Ix1>,
    output_weights: AdamSlot<Ix2>,
    output_bias: AdamSlot<Ix1>,
}

impl HeadSlots {
    #[must_use]
    pub fn new(head: &Head) -> Self {
        Self {
            hidden_weights: AdamSlot::zeros_like(&head.hidden.weights),
            hidden_bias: AdamSlot::zeros_like(&head.hidden.bias),
            output_weights: AdamSlot::zeros_like(&head.output.weights),
            output_bias: AdamSlot::zeros_like(&head.output.bias),
        }
    }
}

/// Mean binary cross-entropy of `probabilities` against 0/1 `targets`
#[must_use]
pub fn binary_cross_entropy(probabilities: &Array1<f32>, targets: &Array1<f32>) -> f32 {
    let n = probabilities.len().max(1) as f32;
    probabilities
        .iter()
        .zip(targets.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f32>()
        / n
}

fn count_correct(probabilities: &Array1<f32>, targets: &Array1<f32>) -> usize {
    probabilities
        .iter()
        .zip(targets.iter())
        .filter(|(&p, &y)| (p > DECISION_THRESHOLD) == (y > 0.5))
        .count()
}

fn column(tensor: Tensor) -> Result<Array1<f32>, ModelError> {
    let shape = tensor.shape().to_vec();
    tensor
        .into_dimensionality::<Ix2>()
        .ok()
        .filter(|t| t.ncols() == 1)
        .map(|t| t.index_axis_move(Axis(1), 0))
        .ok_or(ModelError::InvalidOutput(format!(
            "expected one output per row, got {shape:?}"
        )))
}

impl Head {
    /// Glorot-initialised head for `inputs` pooled features
    pub fn init(
        inputs: usize,
        config: &TrainingConfig,
        rng: &mut fastrand::Rng,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            hidden: Dense::glorot_uniform(inputs, config.hidden_units, rng),
            dropout: Dropout::new(config.dropout)?,
            output: Dense::glorot_uniform(config.hidden_units, 1, rng),
        })
    }

    #[must_use]
    pub fn inputs(&self) -> usize {
        self.hidden.inputs()
    }

    /// Inference-mode probabilities for pooled features `[n, inputs]`
    pub fn predict(&self, pooled: &Array2<f32>) -> Result<Array1<f32>, ModelError> {
        let hidden = Activation::Relu.forward(&self.hidden.forward(&pooled.clone().into_dyn())?)?;
        let logits = self.output.forward(&hidden)?;
        column(Activation::Sigmoid.forward(&logits)?)
    }

    /// One Adam step on a mini-batch with dropout active
    pub fn train_step(
        &mut self,
        pooled: &Array2<f32>,
        targets: &Array1<f32>,
        adam: &mut Adam,
        slots: &mut HeadSlots,
        rng: &mut fastrand::Rng,
    ) -> Result<StepStats, ModelError> {
        let n = pooled.nrows();
        if n == 0 || targets.len() != n {
            return Err(ModelError::ShapeMismatch {
                op: "train_step",
                expected: format!("{} targets", n),
                actual: vec![targets.len()],
            });
        }
        let x = pooled.clone().into_dyn();

        let pre = self.hidden.forward(&x)?;
        let act = Activation::Relu.forward(&pre)?;
        let keep = 1.0 - self.dropout.rate;
        let mask = act.mapv(|_| if rng.f32() < keep { 1.0 / keep } else { 0.0 });
        let dropped = &act * &mask;
        let logits = self.output.forward(&dropped)?;
        let probabilities = column(Activation::Sigmoid.forward(&logits)?)?;

        let stats = StepStats {
            loss: binary_cross_entropy(&probabilities, targets),
            correct: count_correct(&probabilities, targets),
        };

        // Sigmoid followed by cross-entropy: d(loss)/d(logit) = (p - y) / n
        let grad_logits = ((&probabilities - targets) / n as f32)
            .insert_axis(Axis(1))
            .into_dyn();
        let output_grads = self.output.parameter_gradients(&dropped, &grad_logits)?;
        let grad_dropped = self.output.backward(&dropped, &logits, &grad_logits)?;
        let grad_act = grad_dropped * &mask;
        let grad_pre = Activation::Relu.backward(&pre, &act, &grad_act)?;
        let hidden_grads = self.hidden.parameter_gradients(&x, &grad_pre)?;

        adam.tick();
        slots
            .hidden_weights
            .update(adam, &mut self.hidden.weights, &hidden_grads.weights);
        slots
            .hidden_bias
            .update(adam, &mut self.hidden.bias, &hidden_grads.bias);
        slots
            .output_weights
            .update(adam, &mut self.output.weights, &output_grads.weights);
        slots
            .output_bias
            .update(adam, &mut self.output.bias, &output_grads.bias);

        Ok(stats)
    }

    /// Fraction of rows classified correctly
    pub fn accuracy(&self, pooled: &Array2<f32>, targets: &Array1<f32>) -> Result<f32, ModelError> {
        if targets.is_empty() {
            return Ok(0.0);
        }
        let probabilities = self.predict(pooled)?;
        Ok(count_correct(&probabilities, targets) as f32 / targets.len() as f32)
    }

    /// Layers appended after the feature extractor
    #[must_use]
    pub fn into_layers(self) -> Vec<NamedLayer> {
        vec![
            NamedLayer::new(POOL_LAYER, LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
            NamedLayer::new(HIDDEN_LAYER, LayerOp::Dense(self.hidden)),
            NamedLayer::new(HIDDEN_ACTIVATION_LAYER, LayerOp::Activation(Activation::Relu)),
            NamedLayer::new(DROPOUT_LAYER, LayerOp::Dropout(self.dropout)),
            NamedLayer::new(LOGIT_LAYER, LayerOp::Dense(self.output)),
            NamedLayer::new(OUTPUT_LAYER, LayerOp::Activation(Activation::Sigmoid)),
        ]
    }
}

/// Append `head` to a feature-extractor-only classifier
pub fn attach_head(
    backbone: Classifier,
    head: Head,
    labels: ClassLabels,
) -> Result<Classifier, TrainingError> {
    if backbone.feature_layer().is_some() {
        return Err(TrainingError::InvalidBackbone(format!(
            "'{}' already contains global pooling",
            backbone.name()
        )));
    }
    let name = backbone.name().to_string();
    let input = backbone.input_shape();
    let mut layers = backbone.into_layers();
    layers.extend(head.into_layers());
    Ok(Classifier::new(name, input, labels, layers)?)
}
