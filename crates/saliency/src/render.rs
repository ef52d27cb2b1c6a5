//! Saliency renderer: upsample, colour and blend over the original image

use crate::map::SaliencyMap;
use crate::palette::Palette;
use crate::SaliencyError;
use cam_common::save_image;
use image::{imageops, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::info;

/// Heatmap opacity in the overlay
pub const DEFAULT_ALPHA: f32 = 0.4;

/// `clip(round((1 - alpha) * original + alpha * heat), 0, 255)` per channel.
///
/// Returns a new image; neither input is modified.
pub fn blend(original: &RgbImage, heat: &RgbImage, alpha: f32) -> Result<RgbImage, SaliencyError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SaliencyError::InvalidAlpha(alpha));
    }
    if original.dimensions() != heat.dimensions() {
        let (w, h) = heat.dimensions();
        return Err(SaliencyError::ShapeMismatch {
            expected: format!(
                "heatmap of {}x{}",
                original.width(),
                original.height()
            ),
            actual: vec![h as usize, w as usize],
        });
    }

    let mut out = RgbImage::new(original.width(), original.height());
    for ((dst, base), color) in out.pixels_mut().zip(original.pixels()).zip(heat.pixels()) {
        let mix = |o: u8, c: u8| {
            ((1.0 - alpha) * f32::from(o) + alpha * f32::from(c))
                .round()
                .clamp(0.0, 255.0) as u8
        };
        *dst = Rgb([
            mix(base[0], color[0]),
            mix(base[1], color[1]),
            mix(base[2], color[2]),
        ]);
    }
    Ok(out)
}

/// The three renderable images of one explanation, all at the original size
#[derive(Debug, Clone, PartialEq)]
pub struct Rendering {
    pub original: RgbImage,
    pub heatmap: RgbImage,
    pub overlay: RgbImage,
}

/// Where [`Rendering::save`] wrote each image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFiles {
    pub original: PathBuf,
    pub heatmap: PathBuf,
    pub overlay: PathBuf,
    pub panel: PathBuf,
}

impl Rendering {
    /// Original, heatmap and overlay side by side
    #[must_use]
    pub fn panel(&self) -> RgbImage {
        let (w, h) = self.original.dimensions();
        let mut panel = RgbImage::new(w * 3, h);
        for (i, image) in [&self.original, &self.heatmap, &self.overlay]
            .into_iter()
            .enumerate()
        {
            imageops::replace(&mut panel, image, i64::from(w) * i as i64, 0);
        }
        panel
    }

    /// Write `<stem>_original.png`, `<stem>_heatmap.png`, `<stem>_overlay.png`
    /// and `<stem>_panel.png` into `dir`
    pub fn save(&self, dir: &Path, stem: &str) -> Result<RenderedFiles, SaliencyError> {
        let files = RenderedFiles {
            original: dir.join(format!("{stem}_original.png")),
            heatmap: dir.join(format!("{stem}_heatmap.png")),
            overlay: dir.join(format!("{stem}_overlay.png")),
            panel: dir.join(format!("{stem}_panel.png")),
        };
        save_image(&self.original, &files.original, 100)?;
        save_image(&self.heatmap, &files.heatmap, 100)?;
        save_image(&self.overlay, &files.overlay, 100)?;
        save_image(&self.panel(), &files.panel, 100)?;
        info!("Saved explanation images to {}", dir.display());
        Ok(files)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Renderer {
    alpha: f32,
    palette: Palette,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            palette: Palette::jet(),
        }
    }
}

impl Renderer {
    pub fn new(alpha: f32) -> Result<Self, SaliencyError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(SaliencyError::InvalidAlpha(alpha));
        }
        Ok(Self {
            alpha,
            palette: Palette::jet(),
        })
    }

    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Colour-mapped heatmap resampled to `width × height`
    #[must_use]
    pub fn heatmap(&self, map: &SaliencyMap, width: u32, height: u32) -> RgbImage {
        let resized = map.resize(height as usize, width as usize);
        self.palette.apply(&resized.quantize())
    }

    pub fn render(&self, map: &SaliencyMap, original: &RgbImage) -> Result<Rendering, SaliencyError> {
        let (width, height) = original.dimensions();
        let heatmap = self.heatmap(map, width, height);
        let overlay = blend(original, &heatmap, self.alpha)?;
        Ok(Rendering {
            original: original.clone(),
            heatmap,
            overlay,
        })
    }
}
