//! Layer operations
//!
//! All spatial tensors are NHWC (`[batch, height, width, channels]`). Every
//! native layer implements a forward pass and a vector-Jacobian product with
//! respect to its input, which is all the gradient tape needs.

use crate::error::ModelError;
use crate::Tensor;
use ndarray::{s, Array1, Array2, Array4, ArrayView2, ArrayView4, Axis, Ix2, Ix4, Zip};
use serde::{Deserialize, Serialize};

/// A differentiable tensor operation
pub trait Layer {
    /// Short operation name used in logs and errors
    fn op_name(&self) -> &'static str;

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError>;

    /// Gradient with respect to `input`, given the forward `output` and the
    /// gradient flowing into that output
    fn backward(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError>;

    fn is_differentiable(&self) -> bool {
        true
    }
}

pub(crate) fn as_4d<'a>(
    op: &'static str,
    tensor: &'a Tensor,
) -> Result<ArrayView4<'a, f32>, ModelError> {
    tensor
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| ModelError::ShapeMismatch {
            op,
            expected: "[batch, height, width, channels]".to_string(),
            actual: tensor.shape().to_vec(),
        })
}

pub(crate) fn as_2d<'a>(
    op: &'static str,
    tensor: &'a Tensor,
) -> Result<ArrayView2<'a, f32>, ModelError> {
    tensor
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::ShapeMismatch {
            op,
            expected: "[batch, features]".to_string(),
            actual: tensor.shape().to_vec(),
        })
}

fn ensure_same_shape(op: &'static str, lhs: &Tensor, rhs: &Tensor) -> Result<(), ModelError> {
    if lhs.shape() != rhs.shape() {
        return Err(ModelError::ShapeMismatch {
            op,
            expected: format!("{:?}", lhs.shape()),
            actual: rhs.shape().to_vec(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conv2d
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Output size `ceil(input / stride)`, zero padding split top/left-first
    #[default]
    Same,
    /// No padding
    Valid,
}

fn default_stride() -> usize {
    1
}

/// 2-D convolution, kernel laid out `[kernel_h, kernel_w, in_channels, out_channels]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2d {
    pub kernel: Array4<f32>,
    pub bias: Array1<f32>,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub padding: Padding,
}

/// Output length and leading pad along one spatial axis
fn axis_geometry(
    size: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
) -> Option<(usize, usize)> {
    if size == 0 {
        return None;
    }
    match padding {
        Padding::Valid => (size >= kernel).then(|| ((size - kernel) / stride + 1, 0)),
        Padding::Same => {
            let out = size.div_ceil(stride);
            let needed = (out - 1) * stride + kernel;
            Some((out, needed.saturating_sub(size) / 2))
        }
    }
}

impl Conv2d {
    pub fn new(
        kernel: Array4<f32>,
        bias: Array1<f32>,
        stride: usize,
        padding: Padding,
    ) -> Result<Self, ModelError> {
        let conv = Self {
            kernel,
            bias,
            stride,
            padding,
        };
        conv.validate()?;
        Ok(conv)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let (kh, kw, cin, cout) = self.kernel.dim();
        if kh == 0 || kw == 0 || cin == 0 || cout == 0 {
            return Err(ModelError::InvalidParameters(format!(
                "conv2d kernel has an empty dimension: {:?}",
                self.kernel.shape()
            )));
        }
        if self.bias.len() != cout {
            return Err(ModelError::InvalidParameters(format!(
                "conv2d bias has {} entries for {} output channels",
                self.bias.len(),
                cout
            )));
        }
        if self.stride == 0 {
            return Err(ModelError::InvalidParameters(
                "conv2d stride must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.kernel.dim().2
    }

    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.kernel.dim().3
    }

    fn geometry(&self, height: usize, width: usize) -> Result<[(usize, usize); 2], ModelError> {
        let (kh, kw, _, _) = self.kernel.dim();
        let rows = axis_geometry(height, kh, self.stride, self.padding);
        let cols = axis_geometry(width, kw, self.stride, self.padding);
        match (rows, cols) {
            (Some(rows), Some(cols)) => Ok([rows, cols]),
            _ => Err(ModelError::ShapeMismatch {
                op: "conv2d",
                expected: format!("spatial size of at least {kh}x{kw}"),
                actual: vec![height, width],
            }),
        }
    }

    fn check_channels(&self, channels: usize, shape: &[usize]) -> Result<(), ModelError> {
        if channels != self.in_channels() {
            return Err(ModelError::ShapeMismatch {
                op: "conv2d",
                expected: format!("{} input channels", self.in_channels()),
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Input coordinate read by output `out` through kernel tap `tap`
    fn source_index(&self, out: usize, tap: usize, pad: usize, size: usize) -> Option<usize> {
        (out * self.stride + tap)
            .checked_sub(pad)
            .filter(|&index| index < size)
    }
}

impl Layer for Conv2d {
    fn op_name(&self) -> &'static str {
        "conv2d"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let x = as_4d("conv2d", input)?;
        let (batch, height, width, channels) = x.dim();
        self.check_channels(channels, input.shape())?;
        let [(out_h, pad_top), (out_w, pad_left)] = self.geometry(height, width)?;
        let (kh, kw, _, cout) = self.kernel.dim();

        let mut out = Array4::<f32>::zeros((batch, out_h, out_w, cout));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = self.bias.clone();
                    for ky in 0..kh {
                        let Some(iy) = self.source_index(oy, ky, pad_top, height) else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) = self.source_index(ox, kx, pad_left, width) else {
                                continue;
                            };
                            let pixel = x.slice(s![b, iy, ix, ..]);
                            let taps = self.kernel.slice(s![ky, kx, .., ..]);
                            acc += &pixel.dot(&taps);
                        }
                    }
                    out.slice_mut(s![b, oy, ox, ..]).assign(&acc);
                }
            }
        }
        Ok(out.into_dyn())
    }

    fn backward(
        &self,
        input: &Tensor,
        _output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        let x = as_4d("conv2d", input)?;
        let g = as_4d("conv2d", grad_output)?;
        let (batch, height, width, channels) = x.dim();
        self.check_channels(channels, input.shape())?;
        let [(out_h, pad_top), (out_w, pad_left)] = self.geometry(height, width)?;
        let (kh, kw, _, cout) = self.kernel.dim();
        if g.dim() != (batch, out_h, out_w, cout) {
            return Err(ModelError::ShapeMismatch {
                op: "conv2d",
                expected: format!("gradient of shape [{batch}, {out_h}, {out_w}, {cout}]"),
                actual: grad_output.shape().to_vec(),
            });
        }

        let mut grad_input = Array4::<f32>::zeros(x.raw_dim());
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let upstream = g.slice(s![b, oy, ox, ..]);
                    for ky in 0..kh {
                        let Some(iy) = self.source_index(oy, ky, pad_top, height) else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) = self.source_index(ox, kx, pad_left, width) else {
                                continue;
                            };
                            let taps = self.kernel.slice(s![ky, kx, .., ..]);
                            let mut target = grad_input.slice_mut(s![b, iy, ix, ..]);
                            target += &taps.dot(&upstream);
                        }
                    }
                }
            }
        }
        Ok(grad_input.into_dyn())
    }
}

// ---------------------------------------------------------------------------
// Dense
// ---------------------------------------------------------------------------

/// Fully connected layer, weights laid out `[inputs, outputs]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Parameter gradients of a [`Dense`] layer for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct DenseGradients {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Dense {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self, ModelError> {
        let dense = Self { weights, bias };
        dense.validate()?;
        Ok(dense)
    }

    /// Glorot-uniform weights, zero bias
    pub fn glorot_uniform(inputs: usize, outputs: usize, rng: &mut fastrand::Rng) -> Self {
        let limit = (6.0 / (inputs + outputs).max(1) as f32).sqrt();
        let weights =
            Array2::from_shape_fn((inputs, outputs), |_| (rng.f32() * 2.0 - 1.0) * limit);
        Self {
            weights,
            bias: Array1::zeros(outputs),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.weights.is_empty() {
            return Err(ModelError::InvalidParameters(
                "dense weights are empty".to_string(),
            ));
        }
        if self.bias.len() != self.weights.ncols() {
            return Err(ModelError::InvalidParameters(format!(
                "dense bias has {} entries for {} outputs",
                self.bias.len(),
                self.weights.ncols()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    fn check_input<'a>(&self, input: &'a Tensor) -> Result<ArrayView2<'a, f32>, ModelError> {
        let x = as_2d("dense", input)?;
        if x.ncols() != self.inputs() {
            return Err(ModelError::ShapeMismatch {
                op: "dense",
                expected: format!("[batch, {}]", self.inputs()),
                actual: input.shape().to_vec(),
            });
        }
        Ok(x)
    }

    /// Gradients of the weights and bias given the batch input and upstream gradient
    pub fn parameter_gradients(
        &self,
        input: &Tensor,
        grad_output: &Tensor,
    ) -> Result<DenseGradients, ModelError> {
        let x = self.check_input(input)?;
        let g = as_2d("dense", grad_output)?;
        if g.dim() != (x.nrows(), self.outputs()) {
            return Err(ModelError::ShapeMismatch {
                op: "dense",
                expected: format!("gradient of shape [{}, {}]", x.nrows(), self.outputs()),
                actual: grad_output.shape().to_vec(),
            });
        }
        Ok(DenseGradients {
            weights: x.t().dot(&g),
            bias: g.sum_axis(Axis(0)),
        })
    }
}

impl Layer for Dense {
    fn op_name(&self) -> &'static str {
        "dense"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let x = self.check_input(input)?;
        Ok((x.dot(&self.weights) + &self.bias).into_dyn())
    }

    fn backward(
        &self,
        _input: &Tensor,
        _output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        let g = as_2d("dense", grad_output)?;
        if g.ncols() != self.outputs() {
            return Err(ModelError::ShapeMismatch {
                op: "dense",
                expected: format!("gradient of shape [batch, {}]", self.outputs()),
                actual: grad_output.shape().to_vec(),
            });
        }
        Ok(g.dot(&self.weights.t()).into_dyn())
    }
}

// ---------------------------------------------------------------------------
// Element-wise activations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

#[must_use]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Layer for Activation {
    fn op_name(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        Ok(match self {
            Activation::Linear => input.clone(),
            Activation::Relu => input.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => input.mapv(sigmoid),
        })
    }

    fn backward(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        ensure_same_shape(self.op_name(), output, grad_output)?;
        Ok(match self {
            Activation::Linear => grad_output.clone(),
            Activation::Relu => {
                ensure_same_shape("relu", input, grad_output)?;
                Zip::from(grad_output)
                    .and(input)
                    .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 })
            }
            Activation::Sigmoid => Zip::from(grad_output)
                .and(output)
                .map_collect(|&g, &y| g * y * (1.0 - y)),
        })
    }
}

// ---------------------------------------------------------------------------
// Pooling and regularisation
// ---------------------------------------------------------------------------

/// Mean over the two spatial axes: `[n, h, w, c] -> [n, c]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalAveragePooling2d;

impl Layer for GlobalAveragePooling2d {
    fn op_name(&self) -> &'static str {
        "global_average_pooling2d"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let x = as_4d(self.op_name(), input)?;
        x.mean_axis(Axis(1))
            .and_then(|rows| rows.mean_axis(Axis(1)))
            .map(|pooled| pooled.into_dyn())
            .ok_or_else(|| ModelError::ShapeMismatch {
                op: "global_average_pooling2d",
                expected: "non-empty spatial dimensions".to_string(),
                actual: input.shape().to_vec(),
            })
    }

    fn backward(
        &self,
        input: &Tensor,
        _output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        let x = as_4d(self.op_name(), input)?;
        let g = as_2d(self.op_name(), grad_output)?;
        let (batch, height, width, channels) = x.dim();
        if g.dim() != (batch, channels) {
            return Err(ModelError::ShapeMismatch {
                op: "global_average_pooling2d",
                expected: format!("gradient of shape [{batch}, {channels}]"),
                actual: grad_output.shape().to_vec(),
            });
        }
        let scale = 1.0 / (height * width) as f32;
        let per_pixel = g.mapv(|v| v * scale).insert_axis(Axis(1)).insert_axis(Axis(1));
        let spread = per_pixel
            .broadcast((batch, height, width, channels))
            .map(|view| view.to_owned().into_dyn());
        spread.ok_or_else(|| ModelError::ShapeMismatch {
            op: "global_average_pooling2d",
            expected: format!("[{batch}, {height}, {width}, {channels}]"),
            actual: grad_output.shape().to_vec(),
        })
    }
}

/// Dropout; the identity outside the training loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self, ModelError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ModelError::InvalidParameters(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self { rate })
    }
}

impl Layer for Dropout {
    fn op_name(&self) -> &'static str {
        "dropout"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        Ok(input.clone())
    }

    fn backward(
        &self,
        _input: &Tensor,
        _output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        Ok(grad_output.clone())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Every operation a classifier layer can perform
#[derive(Debug)]
pub enum LayerOp {
    Conv2d(Conv2d),
    Dense(Dense),
    Activation(Activation),
    GlobalAveragePooling2d(GlobalAveragePooling2d),
    Dropout(Dropout),
    #[cfg(feature = "onnx")]
    Onnx(crate::onnx::OnnxStage),
}

impl LayerOp {
    fn as_layer(&self) -> &dyn Layer {
        match self {
            LayerOp::Conv2d(op) => op,
            LayerOp::Dense(op) => op,
            LayerOp::Activation(op) => op,
            LayerOp::GlobalAveragePooling2d(op) => op,
            LayerOp::Dropout(op) => op,
            #[cfg(feature = "onnx")]
            LayerOp::Onnx(op) => op,
        }
    }
}

impl Layer for LayerOp {
    fn op_name(&self) -> &'static str {
        self.as_layer().op_name()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.as_layer().forward(input)
    }

    fn backward(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        self.as_layer().backward(input, output, grad_output)
    }

    fn is_differentiable(&self) -> bool {
        self.as_layer().is_differentiable()
    }
}
