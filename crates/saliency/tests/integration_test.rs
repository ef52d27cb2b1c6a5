//! Integration tests for cam-saliency over real classifiers

use cam_common::{ClassLabels, Decision};
use cam_inference::InferenceAdapter;
use cam_model::{
    Activation, Classifier, Conv2d, Dense, GlobalAveragePooling2d, InputShape, LayerOp,
    ModelError, NamedLayer, Padding,
};
use cam_saliency::{
    Explainer, LayerProbe, Renderer, SaliencyEngine, SaliencyError, DEFAULT_ALPHA,
};
use image::{Rgb, RgbImage};
use ndarray::{arr1, Array2, Array4};
use tempfile::TempDir;

/// Detects red: channel 0 of the feature map responds to the red channel
fn red_detector() -> Classifier {
    let kernel = Array4::from_shape_fn((3, 3, 3, 2), |(_, _, cin, cout)| match (cin, cout) {
        (0, 0) => 0.2,
        (1, 0) | (2, 0) => -0.1,
        (_, 1) => 0.05,
        _ => 0.0,
    });
    let conv = Conv2d::new(kernel, arr1(&[0.0, 0.0]), 2, Padding::Same).unwrap();
    let head = Dense::new(
        Array2::from_shape_vec((2, 1), vec![6.0, -1.0]).unwrap(),
        arr1(&[-0.5]),
    )
    .unwrap();

    Classifier::new(
        "red_detector",
        InputShape::new(16, 16),
        ClassLabels::new("red", "other"),
        vec![
            NamedLayer::new("conv", LayerOp::Conv2d(conv)),
            NamedLayer::new("conv_act", LayerOp::Activation(Activation::Relu)),
            NamedLayer::new("avg_pool", LayerOp::GlobalAveragePooling2d(GlobalAveragePooling2d)),
            NamedLayer::new("predictions", LayerOp::Dense(head)),
            NamedLayer::new("output", LayerOp::Activation(Activation::Sigmoid)),
        ],
    )
    .unwrap()
}

/// Grey image with a saturated red square in the lower-right quadrant
fn red_patch_image() -> RgbImage {
    RgbImage::from_fn(64, 48, |x, y| {
        if x >= 40 && y >= 28 {
            Rgb([255, 0, 0])
        } else {
            Rgb([90, 90, 90])
        }
    })
}

#[test]
fn test_unknown_layer_fails_at_construction() {
    let model = red_detector();
    let err = LayerProbe::locate(&model, "nonexistent_layer").unwrap_err();
    assert!(matches!(
        err,
        SaliencyError::Model(ModelError::LayerNotFound { ref name, .. }) if name == "nonexistent_layer"
    ));
    assert!(Explainer::new(&model, Some("nonexistent_layer")).is_err());
}

#[test]
fn test_output_layer_cannot_be_explained() {
    let model = red_detector();
    let err = LayerProbe::locate(&model, "output").unwrap_err();
    assert!(matches!(err, SaliencyError::OutputLayer(_)));
}

#[test]
fn test_pooled_layers_cannot_be_explained() {
    let model = red_detector();
    for layer in ["avg_pool", "predictions"] {
        let err = LayerProbe::locate(&model, layer).unwrap_err();
        assert!(
            matches!(err, SaliencyError::NotSpatial(ref name) if name == layer),
            "{layer}: {err}"
        );
        assert!(matches!(
            Explainer::new(&model, Some(layer)),
            Err(SaliencyError::NotSpatial(_))
        ));
    }
    assert!(LayerProbe::locate(&model, "conv").is_ok());
}

#[test]
fn test_default_layer_is_feature_layer() {
    let model = red_detector();
    let explainer = Explainer::new(&model, None).unwrap();
    assert_eq!(explainer.layer(), "conv_act");
}

#[test]
fn test_dual_output_evaluator() {
    let model = red_detector();
    let probe = LayerProbe::locate(&model, "conv_act").unwrap();
    let adapter = InferenceAdapter::new(&model);
    let batch = adapter.prepare(&red_patch_image()).unwrap();

    let (features, probability) = probe.evaluate(&batch).unwrap();
    assert_eq!(features.dim(), (8, 8, 2));
    assert!((probability - model.predict(&batch).unwrap()).abs() < 1e-6);

    let err = probe.evaluate(&Array4::zeros((2, 16, 16, 3))).unwrap_err();
    assert!(matches!(err, SaliencyError::ShapeMismatch { .. }));
}

#[test]
fn test_saliency_highlights_red_patch() {
    let model = red_detector();
    let explainer = Explainer::new(&model, Some("conv_act")).unwrap();
    let image = red_patch_image();
    let explanation = explainer.explain_image(&image).unwrap();

    assert_eq!(explanation.prediction.label, "red");
    assert_eq!(explanation.saliency.target, Decision::Positive);
    assert_eq!(explanation.saliency.map.max(), 1.0);

    let (row, col) = explanation.saliency.map.peak().unwrap();
    assert!(row >= 4 && col >= 4, "peak at ({row}, {col})");

    let rendering = &explanation.rendering;
    assert_eq!(rendering.original, image);
    assert_eq!(rendering.heatmap.dimensions(), image.dimensions());
    assert_eq!(rendering.overlay.dimensions(), image.dimensions());
}

#[test]
fn test_explanation_agrees_with_inference() {
    let model = red_detector();
    let explainer = Explainer::new(&model, None).unwrap();
    let adapter = InferenceAdapter::new(&model);

    for image in [red_patch_image(), RgbImage::from_pixel(30, 30, Rgb([20, 180, 40]))] {
        let explained = explainer.explain_image(&image).unwrap();
        let predicted = adapter.predict_image(&image).unwrap();
        assert_eq!(explained.prediction.label, predicted.label);
        assert!((explained.prediction.confidence - predicted.confidence).abs() < 1e-6);
    }
}

#[test]
fn test_repeated_explanations_are_identical() {
    let model = red_detector();
    let explainer = Explainer::new(&model, None)
        .unwrap()
        .with_engine(SaliencyEngine::new(1e-8))
        .with_renderer(Renderer::new(DEFAULT_ALPHA).unwrap());
    let image = red_patch_image();

    let first = explainer.explain_image(&image).unwrap();
    let second = explainer.explain_image(&image).unwrap();
    assert_eq!(first.saliency, second.saliency);
    assert_eq!(first.rendering, second.rendering);
}

#[test]
fn test_explain_path_and_save() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("patch.png");
    red_patch_image().save(&input).unwrap();

    let model = red_detector();
    let explainer = Explainer::new(&model, None)
        .unwrap()
        .with_labels(ClassLabels::new("crimson", "plain"));
    let explanation = explainer.explain_path(&input).unwrap();
    assert_eq!(explanation.prediction.label, "crimson");

    let files = explanation
        .rendering
        .save(&dir.path().join("out"), "patch")
        .unwrap();
    assert!(files.overlay.exists());
    assert!(files.panel.exists());

    let missing = explainer.explain_path(dir.path().join("missing.png"));
    assert!(matches!(missing, Err(SaliencyError::Inference(_))));
}
