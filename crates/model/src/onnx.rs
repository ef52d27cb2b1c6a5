//! Frozen pretrained feature extractors executed with ONNX Runtime
//!
//! An ONNX stage only runs forward. Gradients cannot flow through it, so it
//! has to sit entirely before the layer being explained.

use crate::error::ModelError;
use crate::layers::{as_4d, Layer};
use crate::manifest::TensorLayout;
use crate::Tensor;
use cam_common::thread_override;
use ndarray::{ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Create a CPU session with full graph optimizations
pub fn create_session(model_path: &Path) -> Result<Session, ModelError> {
    if !model_path.exists() {
        return Err(ModelError::Io {
            path: model_path.display().to_string(),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "ONNX model not found"),
        });
    }

    let num_threads = thread_override().unwrap_or_else(num_cpus::get_physical);

    let session = Session::builder()
        .map_err(|e| ModelError::Onnx(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ModelError::Onnx(e.to_string()))?
        .with_intra_threads(num_threads)
        .map_err(|e| ModelError::Onnx(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| ModelError::Onnx(format!("{}: {e}", model_path.display())))?;

    info!(
        "Loaded ONNX feature extractor {} ({} threads)",
        model_path.display(),
        num_threads
    );
    Ok(session)
}

/// Name of the graph output used as the stage result
fn primary_output<'a>(path: &Path, names: &'a [String]) -> Result<&'a str, ModelError> {
    names.first().map(String::as_str).ok_or_else(|| {
        ModelError::Onnx(format!("{} declares no outputs", path.display()))
    })
}

/// A forward-only stage backed by an ONNX graph with one input and one output
pub struct OnnxStage {
    path: PathBuf,
    input_layout: TensorLayout,
    output_layout: TensorLayout,
    // Session::run needs &mut self
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxStage")
            .field("path", &self.path)
            .field("input_layout", &self.input_layout)
            .field("output_layout", &self.output_layout)
            .finish_non_exhaustive()
    }
}

impl OnnxStage {
    pub fn load(
        path: impl Into<PathBuf>,
        input_layout: TensorLayout,
        output_layout: TensorLayout,
    ) -> Result<Self, ModelError> {
        let path = path.into();
        let session = create_session(&path)?;
        Ok(Self {
            path,
            input_layout,
            output_layout,
            session: Mutex::new(session),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn input_layout(&self) -> TensorLayout {
        self.input_layout
    }

    #[must_use]
    pub fn output_layout(&self) -> TensorLayout {
        self.output_layout
    }
}

impl Layer for OnnxStage {
    fn op_name(&self) -> &'static str {
        "onnx"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let x = as_4d("onnx", input)?;
        let feed = match self.input_layout {
            TensorLayout::Nhwc => x.as_standard_layout().into_owned(),
            TensorLayout::Nchw => x
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };

        let tensor =
            TensorRef::from_array_view(feed.view()).map_err(|e| ModelError::Onnx(e.to_string()))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Onnx("session lock poisoned".to_string()))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let output_name = primary_output(&self.path, &output_names)?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Onnx(e.to_string()))?;
        let value = outputs.get(output_name).ok_or_else(|| {
            ModelError::Onnx(format!(
                "{}: output '{}' missing from results",
                self.path.display(),
                output_name
            ))
        })?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Onnx(e.to_string()))?;

        let dims = shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ModelError::Onnx(format!("dynamic output shape {shape:?}")))?;
        let output = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| ModelError::Onnx(e.to_string()))?;
        debug!("{} -> {:?}", self.path.display(), output.shape());

        Ok(match (self.output_layout, output.ndim()) {
            (TensorLayout::Nchw, 4) => output
                .permuted_axes(IxDyn(&[0, 2, 3, 1]))
                .as_standard_layout()
                .into_owned(),
            _ => output,
        })
    }

    fn backward(
        &self,
        _input: &Tensor,
        _output: &Tensor,
        _grad_output: &Tensor,
    ) -> Result<Tensor, ModelError> {
        Err(ModelError::Onnx(format!(
            "{} is frozen and has no backward pass",
            self.path.display()
        )))
    }

    fn is_differentiable(&self) -> bool {
        false
    }
}
