//! Transfer-learning loop: frozen backbone, trainable head

use crate::features::{extract_features, FeatureSet};
use crate::head::{attach_head, Head, HeadSlots};
use crate::optim::Adam;
use crate::TrainingError;
use cam_common::{DatasetLayout, TrainingConfig};
use cam_model::Classifier;
use serde::Serialize;
use tracing::{info, warn};

/// Metrics after one pass over the training features
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_accuracy: Option<f32>,
}

/// Trained classifier and its per-epoch history
#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: Classifier,
    pub history: Vec<EpochStats>,
}

#[derive(Debug, Clone)]
pub struct HeadTrainer {
    config: TrainingConfig,
}

impl HeadTrainer {
    pub fn new(config: TrainingConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Fit a fresh head on `train`, reporting accuracy on `valid` per epoch
    pub fn fit(
        &self,
        train: &FeatureSet,
        valid: Option<&FeatureSet>,
    ) -> Result<(Head, Vec<EpochStats>), TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptySplit("train".into()));
        }
        let mut rng = fastrand::Rng::with_seed(self.config.seed);
        let mut head = Head::init(train.channels(), &self.config, &mut rng)?;
        let mut slots = HeadSlots::new(&head);
        let mut adam = Adam::new(self.config.learning_rate);

        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            rng.shuffle(&mut order);
            let mut loss_sum = 0.0;
            let mut correct = 0;
            for chunk in order.chunks(self.config.batch_size) {
                let (x, y) = train.select(chunk);
                let step = head.train_step(&x, &y, &mut adam, &mut slots, &mut rng)?;
                loss_sum += step.loss * chunk.len() as f32;
                correct += step.correct;
            }

            let val_accuracy = match valid {
                Some(set) if !set.is_empty() => {
                    Some(head.accuracy(&set.features, &set.targets)?)
                }
                _ => None,
            };
            let stats = EpochStats {
                epoch,
                loss: loss_sum / train.len() as f32,
                accuracy: correct as f32 / train.len() as f32,
                val_accuracy,
            };
            match stats.val_accuracy {
                Some(val) => info!(
                    "Epoch {}/{}: loss {:.4}, accuracy {:.4}, val_accuracy {:.4}",
                    epoch, self.config.epochs, stats.loss, stats.accuracy, val
                ),
                None => info!(
                    "Epoch {}/{}: loss {:.4}, accuracy {:.4}",
                    epoch, self.config.epochs, stats.loss, stats.accuracy
                ),
            }
            history.push(stats);
        }

        Ok((head, history))
    }

    /// Train a head over `backbone` on the dataset's train split and return
    /// the complete classifier, labelled with the dataset's class names
    pub fn train(
        &self,
        backbone: Classifier,
        dataset: &DatasetLayout,
    ) -> Result<TrainingOutcome, TrainingError> {
        if backbone.feature_layer().is_some() {
            return Err(TrainingError::InvalidBackbone(format!(
                "'{}' already contains global pooling",
                backbone.name()
            )));
        }
        if dataset.train.positives() == 0 || dataset.train.positives() == dataset.train.len() {
            warn!(
                "Split '{}' has only one class; the trained head will not discriminate",
                dataset.train.name
            );
        }
        info!(
            "Training head on {} ({} train images, {} '{}' / {} valid images)",
            dataset.root.display(),
            dataset.train.len(),
            dataset.train.positives(),
            dataset.labels.positive,
            dataset.valid.len()
        );

        let train = extract_features(&backbone, &dataset.train.name, &dataset.train.samples)?;
        let valid = if dataset.valid.is_empty() {
            None
        } else {
            Some(extract_features(
                &backbone,
                &dataset.valid.name,
                &dataset.valid.samples,
            )?)
        };

        let (head, history) = self.fit(&train, valid.as_ref())?;
        let model = attach_head(backbone, head, dataset.labels.clone())?;
        Ok(TrainingOutcome { model, history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn separable(n: usize) -> FeatureSet {
        FeatureSet {
            features: Array2::from_shape_fn((n, 3), |(i, j)| {
                let positive = i % 2 == 0;
                match (positive, j) {
                    (true, 0) | (false, 2) => 0.9,
                    (_, 1) => 0.3,
                    _ => 0.1,
                }
            }),
            targets: Array1::from_shape_fn(n, |i| if i % 2 == 0 { 1.0 } else { 0.0 }),
            skipped: 0,
        }
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            epochs: 40,
            batch_size: 4,
            learning_rate: 0.02,
            hidden_units: 8,
            dropout: 0.2,
            seed: 7,
        }
    }

    #[test]
    fn test_fit_reports_every_epoch() {
        let trainer = HeadTrainer::new(config()).unwrap();
        let train = separable(16);
        let valid = separable(6);
        let (head, history) = trainer.fit(&train, Some(&valid)).unwrap();

        assert_eq!(history.len(), 40);
        assert_eq!(history[0].epoch, 1);
        assert!(history.iter().all(|s| s.val_accuracy.is_some()));
        assert!(history[39].loss < history[0].loss);
        assert_eq!(head.accuracy(&valid.features, &valid.targets).unwrap(), 1.0);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let trainer = HeadTrainer::new(config()).unwrap();
        let train = separable(10);
        let (a, _) = trainer.fit(&train, None).unwrap();
        let (b, _) = trainer.fit(&train, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = TrainingConfig {
            batch_size: 0,
            ..config()
        };
        assert!(matches!(
            HeadTrainer::new(bad),
            Err(TrainingError::Config(_))
        ));
    }

    #[test]
    fn test_empty_training_set() {
        let trainer = HeadTrainer::new(config()).unwrap();
        let empty = FeatureSet {
            features: Array2::zeros((0, 3)),
            targets: Array1::zeros(0),
            skipped: 0,
        };
        assert!(matches!(
            trainer.fit(&empty, None),
            Err(TrainingError::EmptySplit(_))
        ));
    }
}
