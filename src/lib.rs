//! Binary image classification with gradient-weighted class activation maps.
//!
//! Facade over the workspace crates:
//!
//! - [`common`]: decision threshold, class labels, image I/O, datasets, config
//! - [`model`]: layers, the named-layer [`Classifier`](model::Classifier), gradient tape, persistence
//! - [`inference`]: single-image prediction and batch evaluation
//! - [`saliency`]: layer lookup, Grad-CAM maps and heatmap rendering
//! - [`training`]: head training over a frozen feature extractor

pub use cam_common as common;
pub use cam_inference as inference;
pub use cam_model as model;
pub use cam_saliency as saliency;
pub use cam_training as training;

pub use cam_common::{ClassLabels, Decision, Prediction, DECISION_THRESHOLD};
pub use cam_inference::{BatchEvaluator, EvaluationReport, InferenceAdapter};
pub use cam_model::Classifier;
pub use cam_saliency::{Explainer, Explanation, SaliencyEngine, SaliencyMap};
