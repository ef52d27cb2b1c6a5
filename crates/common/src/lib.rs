/// Common types and utilities shared by the classifier, inference and explanation crates
pub mod config;
pub mod dataset;
pub mod image_io;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::{thread_override, CamConfig, ConfigError, TrainingConfig};
pub use dataset::{DatasetError, DatasetLayout, LabeledImage, Split};
pub use image_io::{is_supported_image, load_image, save_image, ImageError};

/// Probability cutoff separating the two classes.
///
/// Shared by the inference adapter (label selection) and the saliency engine
/// (target score selection) so the two paths can never disagree.
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Which side of the decision threshold a probability falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Positive,
    Negative,
}

impl Decision {
    /// `Positive` iff `probability > DECISION_THRESHOLD`
    #[must_use]
    pub fn from_probability(probability: f32) -> Self {
        if probability > DECISION_THRESHOLD {
            Decision::Positive
        } else {
            Decision::Negative
        }
    }

    /// Derivative of the score supporting this decision (`p` when positive,
    /// `1 - p` when negative) with respect to the probability
    #[must_use]
    pub fn score_gradient(self) -> f32 {
        match self {
            Decision::Positive => 1.0,
            Decision::Negative => -1.0,
        }
    }

    /// Index used by datasets and targets: negative = 0, positive = 1
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Decision::Positive => 1,
            Decision::Negative => 0,
        }
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Decision::Negative),
            1 => Some(Decision::Positive),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Positive => write!(f, "positive"),
            Decision::Negative => write!(f, "negative"),
        }
    }
}

/// Human-readable names of the two classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabels {
    /// Class reported when `p > DECISION_THRESHOLD`
    pub positive: String,
    /// Class reported otherwise
    pub negative: String,
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self {
            positive: "positive".to_string(),
            negative: "negative".to_string(),
        }
    }
}

impl ClassLabels {
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive: positive.into(),
            negative: negative.into(),
        }
    }

    #[must_use]
    pub fn label(&self, decision: Decision) -> &str {
        match decision {
            Decision::Positive => &self.positive,
            Decision::Negative => &self.negative,
        }
    }
}

/// A single classifier decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub decision: Decision,
    /// Raw classifier output in [0, 1]
    pub probability: f32,
    /// `max(p, 1 - p)`, always in [0.5, 1.0]
    pub confidence: f32,
}

impl Prediction {
    #[must_use]
    pub fn from_probability(probability: f32, labels: &ClassLabels) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        let decision = Decision::from_probability(probability);
        Self {
            label: labels.label(decision).to_string(),
            decision,
            probability,
            confidence: probability.max(1.0 - probability),
        }
    }

    /// `Prediction: <label>, Confidence: <0.00-1.00>`
    #[must_use]
    pub fn report_line(&self) -> String {
        format!(
            "Prediction: {}, Confidence: {:.2}",
            self.label, self.confidence
        )
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report_line())
    }
}
