//! Labeled-folder dataset discovery
//!
//! Expected layout:
//!
//! ```text
//! root/
//!   train/<class_a>/*.jpg  train/<class_b>/*.png
//!   valid/<class_a>/...    valid/<class_b>/...
//!   test/<class_a>/...     test/<class_b>/...
//! ```
//!
//! Class directories are ordered alphabetically. The first is the negative
//! class (index 0), the second the positive class (index 1).

use crate::image_io::is_supported_image;
use crate::{ClassLabels, Decision};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const SPLIT_NAMES: [&str; 3] = ["train", "valid", "test"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset split directory not found: {0}")]
    MissingSplit(PathBuf),

    #[error("Split {split} must contain exactly two class directories, found {found:?}")]
    ClassCount { split: String, found: Vec<String> },

    #[error("Split {split} has classes {found:?}, expected {expected:?}")]
    ClassMismatch {
        split: String,
        found: [String; 2],
        expected: [String; 2],
    },

    #[error("Unknown split: {0}")]
    UnknownSplit(String),

    #[error("IO error reading {path}: {error}")]
    Io { path: PathBuf, error: std::io::Error },
}

/// One image with its ground-truth class
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
    pub decision: Decision,
}

/// All images of one split
#[derive(Debug, Clone)]
pub struct Split {
    pub name: String,
    pub samples: Vec<LabeledImage>,
}

impl Split {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of positive samples
    #[must_use]
    pub fn positives(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.decision == Decision::Positive)
            .count()
    }

    /// Up to `count` samples drawn without replacement, reproducible for a seed
    #[must_use]
    pub fn sample(&self, count: usize, seed: u64) -> Vec<LabeledImage> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        rng.shuffle(&mut indices);
        indices.truncate(count);
        indices.into_iter().map(|i| self.samples[i].clone()).collect()
    }
}

/// Discovered dataset
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub labels: ClassLabels,
    pub train: Split,
    pub valid: Split,
    pub test: Split,
}

impl DatasetLayout {
    /// Scan `root` for the three splits
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        info!("Scanning dataset at {}", root.display());

        let (train_classes, train) = scan_split(root, "train")?;
        let (valid_classes, valid) = scan_split(root, "valid")?;
        let (test_classes, test) = scan_split(root, "test")?;

        for (name, classes) in [("valid", &valid_classes), ("test", &test_classes)] {
            if *classes != train_classes {
                return Err(DatasetError::ClassMismatch {
                    split: name.to_string(),
                    found: classes.clone(),
                    expected: train_classes.clone(),
                });
            }
        }

        let [negative, positive] = train_classes;
        info!(
            "Dataset: {} train / {} valid / {} test images (negative={}, positive={})",
            train.len(),
            valid.len(),
            test.len(),
            negative,
            positive
        );

        Ok(Self {
            root: root.to_path_buf(),
            labels: ClassLabels::new(positive, negative),
            train,
            valid,
            test,
        })
    }

    pub fn split(&self, name: &str) -> Result<&Split, DatasetError> {
        match name {
            "train" => Ok(&self.train),
            "valid" => Ok(&self.valid),
            "test" => Ok(&self.test),
            other => Err(DatasetError::UnknownSplit(other.to_string())),
        }
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let io_err = |error| DatasetError::Io {
        path: dir.to_path_buf(),
        error,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}

fn scan_split(root: &Path, name: &str) -> Result<([String; 2], Split), DatasetError> {
    let dir = root.join(name);
    if !dir.is_dir() {
        return Err(DatasetError::MissingSplit(dir));
    }

    let class_dirs: Vec<PathBuf> = read_dir_sorted(&dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    let class_names: Vec<String> = class_dirs
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    let classes: [String; 2] = match class_names.as_slice() {
        [a, b] => [a.clone(), b.clone()],
        _ => {
            return Err(DatasetError::ClassCount {
                split: name.to_string(),
                found: class_names,
            })
        }
    };

    let mut samples = Vec::new();
    for (index, class_dir) in class_dirs.iter().enumerate() {
        let decision = Decision::from_index(index).unwrap_or(Decision::Negative);
        for path in read_dir_sorted(class_dir)? {
            if path.is_file() && is_supported_image(&path) {
                samples.push(LabeledImage {
                    path,
                    label: classes[index].clone(),
                    decision,
                });
            }
        }
    }

    debug!("Split {}: {} images", name, samples.len());

    Ok((
        classes,
        Split {
            name: name.to_string(),
            samples,
        },
    ))
}
