//! Pooled backbone features for a dataset split

use crate::TrainingError;
use cam_common::{load_image, LabeledImage};
use cam_inference::{prepare_image, InferenceError};
use cam_model::{Classifier, GlobalAveragePooling2d, Layer};
use ndarray::{Array1, Array2, Axis, Ix2};
use rayon::prelude::*;
use tracing::{debug, warn};

/// One pooled feature row per usable image with its 0/1 target
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub features: Array2<f32>,
    pub targets: Array1<f32>,
    /// Images that could not be read or decoded
    pub skipped: usize,
}

impl FeatureSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.features.ncols()
    }

    /// Rows at `indices`, in that order
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> (Array2<f32>, Array1<f32>) {
        (
            self.features.select(Axis(0), indices),
            self.targets.select(Axis(0), indices),
        )
    }
}

/// Run the backbone over `samples` and global-average-pool its output.
///
/// Images are decoded in parallel; the backbone runs one image at a time.
/// Unreadable images are skipped with a warning.
pub fn extract_features(
    backbone: &Classifier,
    split: &str,
    samples: &[LabeledImage],
) -> Result<FeatureSet, TrainingError> {
    let input = backbone.input_shape();
    let prepared: Vec<_> = samples
        .par_iter()
        .map(|sample| {
            load_image(&sample.path)
                .map_err(InferenceError::from)
                .and_then(|image| prepare_image(&image, input))
        })
        .collect();

    let mut rows = Vec::with_capacity(samples.len());
    let mut targets = Vec::with_capacity(samples.len());
    let mut skipped = 0;
    for (sample, batch) in samples.iter().zip(prepared) {
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Skipping {}: {}", sample.path.display(), e);
                skipped += 1;
                continue;
            }
        };
        let output = backbone.forward(&batch)?;
        let pooled = GlobalAveragePooling2d.forward(&output)?;
        let pooled = pooled
            .into_dimensionality::<Ix2>()
            .map_err(|_| TrainingError::InvalidBackbone("pooled output is not 2-D".into()))?;
        rows.push(pooled.index_axis_move(Axis(0), 0));
        targets.push(sample.decision.index() as f32);
    }

    if rows.is_empty() {
        return Err(TrainingError::EmptySplit(split.to_string()));
    }

    let views: Vec<_> = rows.iter().map(|row| row.view()).collect();
    let features = ndarray::stack(Axis(0), &views).map_err(|e| {
        TrainingError::InvalidBackbone(format!("inconsistent feature widths: {e}"))
    })?;
    debug!(
        "Extracted {} x {} features from split '{}' ({} skipped)",
        features.nrows(),
        features.ncols(),
        split,
        skipped
    );

    Ok(FeatureSet {
        features,
        targets: Array1::from(targets),
        skipped,
    })
}
