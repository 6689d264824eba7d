//! Image encoding: image file or `DynamicImage` → base64 PNG [`EncodedImage`].
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless: text crispness
//! matters far more than file size when a model has to read a slide.

use crate::error::ModelError;
use crate::model::EncodedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Downscale so the longest edge is at most `max_edge`. Never upscales.
pub fn fit_within(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_edge {
        return img;
    }
    img.resize(max_edge, max_edge, FilterType::Lanczos3)
}

/// Encode an in-memory image as base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(EncodedImage {
        base64: b64,
        mime_type: "image/png".to_string(),
    })
}

/// Load an image file, optionally downscale it, and encode it.
pub fn encode_file(path: &Path, max_edge: Option<u32>) -> Result<EncodedImage, ModelError> {
    let failed = |detail: String| ModelError::ImageEncoding {
        path: path.to_path_buf(),
        detail,
    };
    let img = image::open(path).map_err(|e| failed(e.to_string()))?;
    let img = match max_edge {
        Some(edge) => fit_within(img, edge),
        None => img,
    };
    encode_image(&img).map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_image(&solid(10, 10)).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.base64).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn fit_within_keeps_aspect_ratio() {
        let img = fit_within(solid(2400, 1200), 1200);
        assert_eq!((img.width(), img.height()), (1200, 600));

        let small = fit_within(solid(300, 200), 1200);
        assert_eq!((small.width(), small.height()), (300, 200));
    }

    #[test]
    fn encode_file_downscales() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        solid(1600, 400).save(&path).unwrap();

        let encoded = encode_file(&path, Some(800)).unwrap();
        let bytes = STANDARD.decode(&encoded.base64).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!(back.width(), 800);
    }

    #[test]
    fn unreadable_file_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let err = encode_file(&path, None).unwrap_err();
        assert!(matches!(err, ModelError::ImageEncoding { .. }));
    }
}
