//! Path-to-images explanation facade

use crate::engine::{Saliency, SaliencyEngine};
use crate::locator::LayerProbe;
use crate::render::{Renderer, Rendering};
use crate::SaliencyError;
use cam_common::{load_image, ClassLabels, Prediction};
use cam_inference::InferenceAdapter;
use cam_model::Classifier;
use image::RgbImage;
use std::path::Path;
use tracing::info;

/// Prediction, saliency and rendered images for one input
#[derive(Debug, Clone)]
pub struct Explanation {
    pub prediction: Prediction,
    pub saliency: Saliency,
    pub rendering: Rendering,
}

/// Explains classifier decisions over a fixed layer
#[derive(Debug, Clone)]
pub struct Explainer<'m> {
    adapter: InferenceAdapter<'m>,
    probe: LayerProbe<'m>,
    engine: SaliencyEngine,
    renderer: Renderer,
}

impl<'m> Explainer<'m> {
    /// Explainer over `layer`, or the model's feature layer when `None`.
    ///
    /// Fails immediately if the layer does not exist.
    pub fn new(model: &'m Classifier, layer: Option<&str>) -> Result<Self, SaliencyError> {
        let probe = match layer {
            Some(name) => LayerProbe::locate(model, name)?,
            None => LayerProbe::locate_default(model)?,
        };
        Ok(Self {
            adapter: InferenceAdapter::new(model),
            probe,
            engine: SaliencyEngine::default(),
            renderer: Renderer::default(),
        })
    }

    #[must_use]
    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.adapter = self.adapter.with_labels(labels);
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: SaliencyEngine) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn layer(&self) -> &str {
        self.probe.layer()
    }

    pub fn explain_image(&self, image: &RgbImage) -> Result<Explanation, SaliencyError> {
        let batch = self.adapter.prepare(image)?;
        let saliency = self.engine.compute(&self.probe, &batch)?;
        let prediction = Prediction::from_probability(saliency.probability, self.adapter.labels());
        let rendering = self.renderer.render(&saliency.map, image)?;
        Ok(Explanation {
            prediction,
            saliency,
            rendering,
        })
    }

    pub fn explain_path<P: AsRef<Path>>(&self, path: P) -> Result<Explanation, SaliencyError> {
        let path = path.as_ref();
        let image = load_image(path).map_err(cam_inference::InferenceError::from)?;
        let explanation = self.explain_image(&image)?;
        info!(
            "Explained {} at layer '{}': {}",
            path.display(),
            self.layer(),
            explanation.prediction
        );
        Ok(explanation)
    }
}
