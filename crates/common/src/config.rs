//! YAML configuration shared by the `cam` binary and library callers
//!
//! ```yaml
//! model: models/classifier.json
//! target_layer: block14_sepconv2_act
//! labels:
//!   positive: dogs
//!   negative: cats
//! alpha: 0.4
//! output_dir: explanations
//! training:
//!   epochs: 10
//!   batch_size: 32
//! ```

use crate::ClassLabels;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment variable naming a config file when none is passed explicitly
pub const CONFIG_ENV: &str = "CAM_CONFIG";

/// Environment variable capping worker threads (image decoding, ONNX Runtime)
pub const THREADS_ENV: &str = "CAM_THREADS";

/// Thread count from `$CAM_THREADS` when it holds a positive integer
#[must_use]
pub fn thread_override() -> Option<usize> {
    std::env::var(THREADS_ENV)
        .ok()
        .as_deref()
        .and_then(parse_threads)
}

fn parse_threads(value: &str) -> Option<usize> {
    value.trim().parse().ok().filter(|&n: &usize| n > 0)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: std::io::Error },

    #[error("Failed to parse config {path}: {error}")]
    Parse {
        path: PathBuf,
        error: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamConfig {
    /// Persisted classifier manifest
    pub model: PathBuf,
    /// Layer whose activations are explained; the model's feature layer when unset
    pub target_layer: Option<String>,
    /// Overrides the class names stored in the model
    pub labels: Option<ClassLabels>,
    /// Heatmap opacity in the overlay
    pub alpha: f32,
    /// Maxima at or below this value produce an all-zero saliency map
    pub epsilon: f32,
    pub output_dir: PathBuf,
    pub training: TrainingConfig,
}

impl Default for CamConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/classifier.json"),
            target_layer: None,
            labels: None,
            alpha: 0.4,
            epsilon: 1e-10,
            output_dir: PathBuf::from("explanations"),
            training: TrainingConfig::default(),
        }
    }
}

/// Hyperparameters of the head-training recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Width of the hidden dense layer in the head
    pub hidden_units: usize,
    pub dropout: f32,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            hidden_units: 128,
            dropout: 0.5,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::Invalid("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.hidden_units == 0 {
            return Err(ConfigError::Invalid("hidden_units must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

impl CamConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        let config: CamConfig =
            serde_yaml::from_str(&contents).map_err(|error| ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            })?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Explicit path, else `$CAM_CONFIG`, else defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_yaml_file(path),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Self::from_yaml_file(PathBuf::from(path)),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::Invalid(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.epsilon >= 0.0 && self.epsilon.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "epsilon must be a non-negative number, got {}",
                self.epsilon
            )));
        }
        self.training.validate()
    }
}
