//! JSON persistence of a classifier
//!
//! A saved model is one manifest file holding the layer registry in order,
//! with native layer weights inline. ONNX stages reference their graph by a
//! path relative to the manifest.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "name": "cats_vs_dogs",
//!   "input": { "height": 299, "width": 299 },
//!   "labels": { "positive": "dogs", "negative": "cats" },
//!   "layers": [
//!     { "name": "backbone", "op": { "type": "onnx", "path": "xception.onnx" } },
//!     { "name": "avg_pool", "op": { "type": "global_average_pooling2d" } },
//!     { "name": "output", "op": { "type": "activation", "function": "sigmoid" } }
//!   ]
//! }
//! ```

use crate::classifier::{Classifier, InputShape, NamedLayer};
use crate::error::ModelError;
use crate::layers::{Activation, Conv2d, Dense, Dropout, GlobalAveragePooling2d, LayerOp};
use cam_common::ClassLabels;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const FORMAT_VERSION: u32 = 1;

/// Memory layout of a 4-D tensor exchanged with an ONNX graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnnxSpec {
    /// Relative paths resolve against the manifest's directory
    pub path: PathBuf,
    #[serde(default)]
    pub input_layout: TensorLayout,
    #[serde(default)]
    pub output_layout: TensorLayout,
}

/// Serialized form of a [`LayerOp`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d(Conv2d),
    Dense(Dense),
    Activation { function: Activation },
    GlobalAveragePooling2d,
    Dropout(Dropout),
    Onnx(OnnxSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    pub op: LayerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub format_version: u32,
    pub name: String,
    pub input: InputShape,
    #[serde(default)]
    pub labels: ClassLabels,
    pub layers: Vec<LayerEntry>,
}

impl LayerSpec {
    /// Instantiate the layer, loading external graphs relative to `base_dir`
    pub fn build(&self, base_dir: &Path) -> Result<LayerOp, ModelError> {
        Ok(match self {
            LayerSpec::Conv2d(conv) => {
                conv.validate()?;
                LayerOp::Conv2d(conv.clone())
            }
            LayerSpec::Dense(dense) => {
                dense.validate()?;
                LayerOp::Dense(dense.clone())
            }
            LayerSpec::Activation { function } => LayerOp::Activation(*function),
            LayerSpec::GlobalAveragePooling2d => {
                LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)
            }
            LayerSpec::Dropout(dropout) => LayerOp::Dropout(Dropout::new(dropout.rate)?),
            LayerSpec::Onnx(spec) => build_onnx(spec, base_dir)?,
        })
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(spec: &OnnxSpec, base_dir: &Path) -> Result<LayerOp, ModelError> {
    let stage = crate::onnx::OnnxStage::load(
        base_dir.join(&spec.path),
        spec.input_layout,
        spec.output_layout,
    )?;
    Ok(LayerOp::Onnx(stage))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(_spec: &OnnxSpec, _base_dir: &Path) -> Result<LayerOp, ModelError> {
    Err(ModelError::OnnxDisabled)
}

impl LayerOp {
    /// Serialized form; external graph paths are written relative to `base_dir` when possible
    #[cfg_attr(not(feature = "onnx"), allow(unused_variables))]
    pub fn spec(&self, base_dir: &Path) -> LayerSpec {
        match self {
            LayerOp::Conv2d(conv) => LayerSpec::Conv2d(conv.clone()),
            LayerOp::Dense(dense) => LayerSpec::Dense(dense.clone()),
            LayerOp::Activation(function) => LayerSpec::Activation {
                function: *function,
            },
            LayerOp::GlobalAveragePooling2d(_) => LayerSpec::GlobalAveragePooling2d,
            LayerOp::Dropout(dropout) => LayerSpec::Dropout(*dropout),
            #[cfg(feature = "onnx")]
            LayerOp::Onnx(stage) => LayerSpec::Onnx(OnnxSpec {
                path: stage
                    .path()
                    .strip_prefix(base_dir)
                    .unwrap_or(stage.path())
                    .to_path_buf(),
                input_layout: stage.input_layout(),
                output_layout: stage.output_layout(),
            }),
        }
    }
}

impl ModelManifest {
    pub fn from_json_file(path: &Path) -> Result<Self, ModelError> {
        let bytes = fs::read(path).map_err(|error| ModelError::Io {
            path: path.display().to_string(),
            error,
        })?;
        let manifest: ModelManifest = serde_json::from_slice(&bytes)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(ModelError::InvalidManifest(format!(
                "unsupported format_version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        Ok(manifest)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |error| ModelError::Io {
            path: path.display().to_string(),
            error,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(io_err)
    }

    /// Build the classifier described by this manifest
    pub fn instantiate(&self, base_dir: &Path) -> Result<Classifier, ModelError> {
        let layers = self
            .layers
            .iter()
            .map(|entry| {
                entry
                    .op
                    .build(base_dir)
                    .map(|op| NamedLayer::new(entry.name.clone(), op))
                    .map_err(|e| e.in_layer(&entry.name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Classifier::new(self.name.clone(), self.input, self.labels.clone(), layers)
    }
}

fn manifest_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Classifier {
    /// Serialized description of this classifier
    #[must_use]
    pub fn manifest(&self, base_dir: &Path) -> ModelManifest {
        ModelManifest {
            format_version: FORMAT_VERSION,
            name: self.name().to_string(),
            input: self.input_shape(),
            labels: self.labels().clone(),
            layers: self
                .layers()
                .iter()
                .map(|layer| LayerEntry {
                    name: layer.name.clone(),
                    op: layer.op.spec(base_dir),
                })
                .collect(),
        }
    }

    /// Load a classifier from its JSON manifest
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let manifest = ModelManifest::from_json_file(path)?;
        let model = manifest.instantiate(&manifest_dir(path))?;
        info!(
            "Loaded classifier '{}' from {} ({} layers, input {}x{})",
            model.name(),
            path.display(),
            model.layers().len(),
            model.input_shape().height,
            model.input_shape().width
        );
        Ok(model)
    }

    /// Write this classifier's manifest to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let path = path.as_ref();
        self.manifest(&manifest_dir(path)).write_json_file(path)?;
        info!("Saved classifier '{}' to {}", self.name(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Padding;
    use ndarray::{arr1, arr2, Array4};
    use tempfile::TempDir;

    fn sample_model() -> Classifier {
        let conv = Conv2d::new(
            Array4::from_shape_fn((3, 3, 3, 2), |(a, b, c, d)| (a + b + c + d) as f32 * 0.01),
            arr1(&[0.0, 0.5]),
            1,
            Padding::Same,
        )
        .unwrap();
        Classifier::new(
            "sample",
            InputShape::new(6, 6),
            ClassLabels::new("dogs", "cats"),
            vec![
                NamedLayer::new("conv1", LayerOp::Conv2d(conv)),
                NamedLayer::new("conv1_act", LayerOp::Activation(Activation::Relu)),
                NamedLayer::new("avg_pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
                NamedLayer::new("drop", LayerOp::Dropout(Dropout::new(0.5).unwrap())),
                NamedLayer::new(
                    "logit",
                    LayerOp::Dense(Dense::new(arr2(&[[0.3], [-0.7]]), arr1(&[0.1])).unwrap()),
                ),
                NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_save_and_load_preserves_predictions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("classifier.json");
        let model = sample_model();
        model.save(&path).unwrap();

        let loaded = Classifier::load(&path).unwrap();
        assert_eq!(loaded.name(), "sample");
        assert_eq!(loaded.layer_names(), model.layer_names());
        assert_eq!(loaded.labels(), &ClassLabels::new("dogs", "cats"));

        let batch =
            Array4::from_shape_fn((1, 6, 6, 3), |(_, y, x, c)| (y * 6 + x + c) as f32 / 50.0);
        let (a, b) = (loaded.predict(&batch).unwrap(), model.predict(&batch).unwrap());
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_manifest_json_shape() {
        let manifest = sample_model().manifest(Path::new("."));
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["format_version"], 1);
        assert_eq!(json["layers"][1]["op"]["type"], "activation");
        assert_eq!(json["layers"][1]["op"]["function"], "relu");
        assert_eq!(json["layers"][2]["op"]["type"], "global_average_pooling2d");
        assert_eq!(json["layers"][3]["op"]["rate"], 0.5);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classifier.json");
        let mut manifest = sample_model().manifest(dir.path());
        manifest.format_version = 7;
        manifest.write_json_file(&path).unwrap();

        let err = Classifier::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::InvalidManifest(_)));
    }

    #[test]
    fn test_missing_labels_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classifier.json");
        std::fs::write(
            &path,
            r#"{"format_version":1,"name":"bare","input":{"height":2,"width":2},
               "layers":[{"name":"pool","op":{"type":"global_average_pooling2d"}}]}"#,
        )
        .unwrap();
        let model = Classifier::load(&path).unwrap();
        assert_eq!(model.labels(), &ClassLabels::default());
    }

    #[test]
    fn test_invalid_weights_reported_with_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classifier.json");
        let mut manifest = sample_model().manifest(dir.path());
        if let LayerSpec::Dense(dense) = &mut manifest.layers[4].op {
            dense.bias = arr1(&[0.0, 0.0]);
        }
        manifest.write_json_file(&path).unwrap();

        let err = Classifier::load(&path).unwrap_err();
        match err {
            ModelError::InLayer { layer, source } => {
                assert_eq!(layer, "logit");
                assert!(matches!(*source, ModelError::InvalidParameters(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_stage_requires_feature() {
        let spec = LayerSpec::Onnx(OnnxSpec {
            path: PathBuf::from("backbone.onnx"),
            input_layout: TensorLayout::Nchw,
            output_layout: TensorLayout::Nchw,
        });
        let err = spec.build(Path::new(".")).unwrap_err();
        assert!(matches!(err, ModelError::OnnxDisabled));
    }
}
