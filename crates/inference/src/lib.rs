//! Single-image inference and batch evaluation
//!
//! [`InferenceAdapter`] turns an image path into a [`Prediction`] using a
//! borrowed, read-only [`Classifier`]. [`BatchEvaluator`] runs the adapter over
//! labeled images and reports accuracy.

pub mod evaluation;
pub mod preprocess;

use cam_common::{load_image, ClassLabels, ImageError, Prediction};
use cam_model::{Classifier, InputShape, ModelError};
use image::RgbImage;
use ndarray::Array4;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub use evaluation::{BatchEvaluator, EvaluationError, EvaluationRecord, EvaluationReport};
pub use preprocess::prepare_image;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] ImageError),

    #[error(
        "Image of {width}x{height} cannot be conformed to model input {}x{}",
        .expected.width,
        .expected.height
    )]
    ShapeMismatch {
        width: u32,
        height: u32,
        expected: InputShape,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Maps images to labeled predictions with a shared classifier
#[derive(Debug, Clone)]
pub struct InferenceAdapter<'m> {
    model: &'m Classifier,
    labels: ClassLabels,
}

impl<'m> InferenceAdapter<'m> {
    /// Adapter reporting the class names stored in the model
    #[must_use]
    pub fn new(model: &'m Classifier) -> Self {
        Self {
            model,
            labels: model.labels().clone(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn model(&self) -> &'m Classifier {
        self.model
    }

    #[must_use]
    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Model-ready `1 × H × W × 3` batch for a decoded image
    pub fn prepare(&self, image: &RgbImage) -> Result<Array4<f32>, InferenceError> {
        prepare_image(image, self.model.input_shape())
    }

    /// Raw probability of the positive class
    pub fn probability(&self, image: &RgbImage) -> Result<f32, InferenceError> {
        let batch = self.prepare(image)?;
        Ok(self.model.predict(&batch)?)
    }

    pub fn predict_image(&self, image: &RgbImage) -> Result<Prediction, InferenceError> {
        let probability = self.probability(image)?;
        Ok(Prediction::from_probability(probability, &self.labels))
    }

    /// Load, resize, normalise and classify one image file
    pub fn predict_path<P: AsRef<Path>>(&self, path: P) -> Result<Prediction, InferenceError> {
        let path = path.as_ref();
        let image = load_image(path)?;
        let prediction = self.predict_image(&image)?;
        debug!(
            "{}: p={:.4} -> {} ({:.2})",
            path.display(),
            prediction.probability,
            prediction.label,
            prediction.confidence
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_common::Decision;
    use cam_model::{Activation, Dense, GlobalAveragePooling2d, LayerOp, NamedLayer};
    use image::Rgb;
    use ndarray::{arr1, arr2};
    use tempfile::TempDir;

    fn brightness_model() -> Classifier {
        Classifier::new(
            "brightness",
            InputShape::new(4, 4),
            ClassLabels::new("bright", "dark"),
            vec![
                NamedLayer::new("pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
                NamedLayer::new(
                    "logit",
                    LayerOp::Dense(
                        Dense::new(arr2(&[[4.0], [4.0], [4.0]]), arr1(&[-6.0])).unwrap(),
                    ),
                ),
                NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_bright_and_dark() {
        let model = brightness_model();
        let adapter = InferenceAdapter::new(&model);

        let bright = adapter
            .predict_image(&RgbImage::from_pixel(9, 7, Rgb([255, 255, 255])))
            .unwrap();
        assert_eq!(bright.label, "bright");
        assert_eq!(bright.decision, Decision::Positive);
        assert!(bright.confidence > 0.99);

        let dark = adapter
            .predict_image(&RgbImage::from_pixel(9, 7, Rgb([0, 0, 0])))
            .unwrap();
        assert_eq!(dark.label, "dark");
        assert!((0.5..=1.0).contains(&dark.confidence));
        assert!(dark.report_line().starts_with("Prediction: dark, Confidence: 1.00"));
    }

    #[test]
    fn test_label_override() {
        let model = brightness_model();
        let adapter = InferenceAdapter::new(&model).with_labels(ClassLabels::new("day", "night"));
        let prediction = adapter
            .predict_image(&RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])))
            .unwrap();
        assert_eq!(prediction.label, "night");
    }

    #[test]
    fn test_predict_path_errors() {
        let model = brightness_model();
        let adapter = InferenceAdapter::new(&model);
        let dir = TempDir::new().unwrap();

        let missing = adapter.predict_path(dir.path().join("missing.png"));
        assert!(matches!(missing, Err(InferenceError::ImageLoad(_))));

        let garbage = dir.path().join("garbage.jpg");
        std::fs::write(&garbage, b"not an image").unwrap();
        assert!(matches!(
            adapter.predict_path(&garbage),
            Err(InferenceError::ImageLoad(_))
        ));
    }

    #[test]
    fn test_predict_path_reads_file() {
        let model = brightness_model();
        let adapter = InferenceAdapter::new(&model);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("white.png");
        RgbImage::from_pixel(16, 16, Rgb([250, 250, 250]))
            .save(&path)
            .unwrap();

        let prediction = adapter.predict_path(&path).unwrap();
        assert_eq!(prediction.label, "bright");
    }
}
