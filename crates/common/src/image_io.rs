//! Image I/O utilities
//!
//! Loading always yields an 8-bit RGB image regardless of the source color
//! type. Saving picks the encoder from the file extension.
//!
//! Only `.jpg`, `.jpeg` and `.png` files count as dataset images; `load_image`
//! itself accepts anything the `image` crate can decode.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Extensions recognised as images when scanning directories
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Errors that can occur during image I/O operations
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to read image file {path}: {error}")]
    ReadError { path: String, error: String },

    #[error("Failed to decode image {path}: {error}")]
    DecodeError { path: String, error: String },

    #[error("Failed to encode image: {0}")]
    EncodeError(String),

    #[error("Failed to write image file {path}: {error}")]
    WriteError { path: String, error: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// Whether the path has one of the dataset image extensions (case-insensitive)
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    let extension = extension_of(path);
    IMAGE_EXTENSIONS.contains(&extension.as_str())
}

/// Load an image from a file path, automatically detecting format
///
/// The file is read fully before decoding so that a missing file and a
/// corrupt file produce distinct errors.
///
/// # Example
/// ```no_run
/// use cam_common::image_io::load_image;
/// let img = load_image("photo.jpg")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage, ImageError> {
    let path = path.as_ref();

    let data = fs::read(path).map_err(|e| ImageError::ReadError {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let img = image::load_from_memory(&data).map_err(|e| ImageError::DecodeError {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    debug!(
        "Loaded {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );

    Ok(img.to_rgb8())
}

/// Save an RGB image to a file, determining the format from the extension
///
/// `quality` (1-100) only applies to JPEG output. Parent directories are
/// created when missing.
pub fn save_image<P: AsRef<Path>>(
    image: &RgbImage,
    path: P,
    quality: u8,
) -> Result<(), ImageError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match extension_of(path).as_str() {
        "jpg" | "jpeg" => save_jpeg(image, path, quality),
        _ => image.save(path).map_err(|e| ImageError::WriteError {
            path: path.display().to_string(),
            error: e.to_string(),
        }),
    }
}

fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), ImageError> {
    let file = fs::File::create(path).map_err(|e| ImageError::WriteError {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality.clamp(1, 100));
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| ImageError::EncodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image(Path::new("a/b/cat.jpg")));
        assert!(is_supported_image(Path::new("cat.JPEG")));
        assert!(is_supported_image(Path::new("cat.Png")));
        assert!(!is_supported_image(Path::new("cat.gif")));
        assert!(!is_supported_image(Path::new("README")));
    }

    #[test]
    fn test_png_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("square.png");
        let img = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7]));

        save_image(&img, &path, 90).unwrap();
        let loaded = load_image(&path).unwrap();

        assert_eq!(loaded.dimensions(), (8, 6));
        assert_eq!(loaded.as_raw(), img.as_raw());
    }

    #[test]
    fn test_jpeg_save_and_load_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gray.jpg");
        let img = RgbImage::from_pixel(16, 12, Rgb([128, 128, 128]));

        save_image(&img, &path, 95).unwrap();
        let loaded = load_image(&path).unwrap();

        assert_eq!(loaded.dimensions(), (16, 12));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_image("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, ImageError::ReadError { .. }));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"this is not a png").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, ImageError::DecodeError { .. }));
    }
}
