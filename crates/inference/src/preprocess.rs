//! Conforming decoded images to the classifier input

use crate::InferenceError;
use cam_model::InputShape;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Resize to the model resolution, scale into [0, 1] and add a batch axis.
///
/// Returns a `1 × H × W × 3` batch.
pub fn prepare_image(image: &RgbImage, input: InputShape) -> Result<Array4<f32>, InferenceError> {
    let (width, height) = image.dimensions();
    let target = u32::try_from(input.width)
        .ok()
        .zip(u32::try_from(input.height).ok())
        .filter(|&(w, h)| w > 0 && h > 0);
    let Some((target_w, target_h)) = target.filter(|_| width > 0 && height > 0) else {
        return Err(InferenceError::ShapeMismatch {
            width,
            height,
            expected: input,
        });
    };

    let resized;
    let source = if (width, height) == (target_w, target_h) {
        image
    } else {
        resized = imageops::resize(image, target_w, target_h, FilterType::Triangle);
        &resized
    };

    let mut batch = Array4::<f32>::zeros((1, input.height, input.width, 3));
    for (x, y, pixel) in source.enumerate_pixels() {
        for c in 0..3 {
            batch[[0, y as usize, x as usize, c]] = f32::from(pixel[c]) / 255.0;
        }
    }
    Ok(batch)
}
