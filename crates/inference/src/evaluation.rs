//! Batch evaluation harness
//!
//! Per-item failures (unreadable images, shape problems) are recorded and
//! skipped. Accuracy is computed over the items that produced a prediction.

use crate::InferenceAdapter;
use cam_common::{LabeledImage, Prediction};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Evaluation needs at least one image")]
    EmptyBatch,

    #[error("None of the {0} images could be classified")]
    NothingScored(usize),
}

/// Outcome for one evaluated image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub image: PathBuf,
    pub true_label: String,
    /// `None` when the image could not be classified
    pub prediction: Option<Prediction>,
    pub correct: bool,
    pub error: Option<String>,
}

impl EvaluationRecord {
    #[must_use]
    pub fn predicted_label(&self) -> Option<&str> {
        self.prediction.as_ref().map(|p| p.label.as_str())
    }

    #[must_use]
    pub fn confidence(&self) -> Option<f32> {
        self.prediction.as_ref().map(|p| p.confidence)
    }

    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.prediction.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub records: Vec<EvaluationRecord>,
    pub correct: usize,
    pub scored: usize,
}

impl EvaluationReport {
    /// `correct / scored`, in [0, 1]
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        self.correct as f64 / self.scored as f64
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.records.len() - self.scored
    }

    /// `Accuracy on selected test images: <0.00-100.00>%`
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "Accuracy on selected test images: {:.2}%",
            self.accuracy() * 100.0
        )
    }
}

/// Runs an [`InferenceAdapter`] over labeled images
#[derive(Debug, Clone)]
pub struct BatchEvaluator<'a> {
    adapter: InferenceAdapter<'a>,
}

impl<'a> BatchEvaluator<'a> {
    #[must_use]
    pub fn new(adapter: InferenceAdapter<'a>) -> Self {
        Self { adapter }
    }

    #[must_use]
    pub fn adapter(&self) -> &InferenceAdapter<'a> {
        &self.adapter
    }

    /// Evaluate `(image path, true label)` pairs in order
    pub fn evaluate<I, P, L>(&self, items: I) -> Result<EvaluationReport, EvaluationError>
    where
        I: IntoIterator<Item = (P, L)>,
        P: Into<PathBuf>,
        L: Into<String>,
    {
        let mut records = Vec::new();
        let mut correct = 0;
        let mut scored = 0;

        for (path, true_label) in items {
            let image = path.into();
            let true_label = true_label.into();
            let record = match self.adapter.predict_path(&image) {
                Ok(prediction) => {
                    let hit = prediction.label == true_label;
                    scored += 1;
                    correct += usize::from(hit);
                    debug!(
                        "{}: true={} predicted={} ({:.2})",
                        image.display(),
                        true_label,
                        prediction.label,
                        prediction.confidence
                    );
                    EvaluationRecord {
                        image,
                        true_label,
                        prediction: Some(prediction),
                        correct: hit,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Skipping {}: {}", image.display(), e);
                    EvaluationRecord {
                        image,
                        true_label,
                        prediction: None,
                        correct: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            records.push(record);
        }

        if records.is_empty() {
            return Err(EvaluationError::EmptyBatch);
        }
        if scored == 0 {
            return Err(EvaluationError::NothingScored(records.len()));
        }

        let report = EvaluationReport {
            records,
            correct,
            scored,
        };
        info!(
            "Evaluated {} images: {} correct, {} failed",
            report.scored,
            report.correct,
            report.failed()
        );
        Ok(report)
    }

    /// Evaluate dataset samples against their folder labels
    pub fn evaluate_samples(
        &self,
        samples: &[LabeledImage],
    ) -> Result<EvaluationReport, EvaluationError> {
        self.evaluate(
            samples
                .iter()
                .map(|s| (s.path.clone(), s.label.clone())),
        )
    }
}
