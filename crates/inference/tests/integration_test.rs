//! Integration tests for cam-inference

use cam_common::{ClassLabels, DatasetLayout};
use cam_inference::{BatchEvaluator, EvaluationError, InferenceAdapter};
use cam_model::{
    Activation, Classifier, Dense, GlobalAveragePooling2d, InputShape, LayerOp, NamedLayer,
};
use image::{Rgb, RgbImage};
use ndarray::{arr1, arr2};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Positive ("bright") when the mean intensity is above one half
fn brightness_model() -> Classifier {
    Classifier::new(
        "brightness",
        InputShape::new(8, 8),
        ClassLabels::new("bright", "dark"),
        vec![
            NamedLayer::new("pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
            NamedLayer::new(
                "logit",
                LayerOp::Dense(Dense::new(arr2(&[[4.0], [4.0], [4.0]]), arr1(&[-6.0])).unwrap()),
            ),
            NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)),
        ],
    )
    .unwrap()
}

fn write_png(dir: &Path, name: &str, value: u8) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(20, 14, Rgb([value, value, value]))
        .save(&path)
        .unwrap();
    path
}

#[test]
fn test_three_of_four_correct() {
    let dir = TempDir::new().unwrap();
    let model = brightness_model();
    let evaluator = BatchEvaluator::new(InferenceAdapter::new(&model));

    let items = vec![
        (write_png(dir.path(), "white.png", 255), "bright"),
        (write_png(dir.path(), "black.png", 0), "dark"),
        (write_png(dir.path(), "light.png", 230), "bright"),
        (write_png(dir.path(), "mislabeled.png", 255), "dark"),
    ];
    let report = evaluator.evaluate(items).unwrap();

    assert_eq!(report.records.len(), 4);
    assert_eq!(report.correct, 3);
    assert_eq!(report.scored, 4);
    assert!((report.accuracy() - 0.75).abs() < 1e-12);
    assert_eq!(
        report.summary_line(),
        "Accuracy on selected test images: 75.00%"
    );
    assert!(!report.records[3].correct);
    assert_eq!(report.records[3].predicted_label(), Some("bright"));
    assert!(report.records[0].confidence().unwrap() >= 0.5);
}

#[test]
fn test_empty_batch_is_an_error() {
    let model = brightness_model();
    let evaluator = BatchEvaluator::new(InferenceAdapter::new(&model));
    let err = evaluator
        .evaluate(Vec::<(PathBuf, String)>::new())
        .unwrap_err();
    assert_eq!(err, EvaluationError::EmptyBatch);
}

#[test]
fn test_unreadable_items_are_recorded_and_skipped() {
    let dir = TempDir::new().unwrap();
    let model = brightness_model();
    let evaluator = BatchEvaluator::new(InferenceAdapter::new(&model));

    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"\x89PNG truncated").unwrap();
    let items = vec![
        (write_png(dir.path(), "white.png", 255), "bright"),
        (broken, "dark"),
        (dir.path().join("missing.jpg"), "dark"),
    ];
    let report = evaluator.evaluate(items).unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.scored, 1);
    assert_eq!(report.failed(), 2);
    assert!(report.records[1].error.is_some());
    assert!(report.records[2].prediction.is_none());
    assert_eq!(
        report.summary_line(),
        "Accuracy on selected test images: 100.00%"
    );
}

#[test]
fn test_all_items_failing() {
    let dir = TempDir::new().unwrap();
    let model = brightness_model();
    let evaluator = BatchEvaluator::new(InferenceAdapter::new(&model));
    let err = evaluator
        .evaluate(vec![(dir.path().join("nope.png"), "dark")])
        .unwrap_err();
    assert_eq!(err, EvaluationError::NothingScored(1));
}

#[test]
fn test_evaluate_dataset_split() {
    let dir = TempDir::new().unwrap();
    for split in ["train", "valid", "test"] {
        for (class, value) in [("bright", 240u8), ("dark", 10u8)] {
            let class_dir = dir.path().join(split).join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            write_png(&class_dir, "a.png", value);
            write_png(&class_dir, "b.png", value);
        }
    }
    let layout = DatasetLayout::discover(dir.path()).unwrap();
    // Alphabetical: "bright" is the negative class of the dataset, which does
    // not matter here since predictions are compared by name
    let model = brightness_model();
    let evaluator = BatchEvaluator::new(InferenceAdapter::new(&model));

    let report = evaluator.evaluate_samples(&layout.test.samples).unwrap();
    assert_eq!(report.scored, 4);
    assert_eq!(report.correct, 4);

    let sampled = layout.test.sample(3, 7);
    let report = evaluator.evaluate_samples(&sampled).unwrap();
    assert_eq!(report.records.len(), 3);
}
