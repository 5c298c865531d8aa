//! Image decoding helpers and WebP thumbnails.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, ImageFormat};

#[derive(Debug)]
pub struct Thumbnail {
    /// Lossy WebP bytes
    pub data: Vec<u8>,
    pub dimensions: (u32, u32),
}

pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(data).context("Failed to decode image")
}

/// Scale down so neither side exceeds `max_dimension`, keeping the aspect
/// ratio, and encode as lossy WebP. Small images keep their size.
pub fn make_thumbnail(img: &DynamicImage, max_dimension: u32, quality: u8) -> Result<Thumbnail> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        anyhow::bail!("image has no pixels");
    }

    let resized;
    let source = if orig_w > max_dimension || orig_h > max_dimension {
        let scale = (max_dimension as f64) / (orig_w.max(orig_h) as f64);
        let new_w = (((orig_w as f64) * scale).round() as u32).max(1);
        let new_h = (((orig_h as f64) * scale).round() as u32).max(1);
        resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3);
        &resized
    } else {
        img
    };

    let rgba = source.to_rgba8();
    let (width, height) = rgba.dimensions();

    let encoder = webp::Encoder::from_rgba(&rgba, width, height);
    // libwebp rejects qualities above 100
    let webp_data = encoder.encode(f32::from(quality.min(100)));

    Ok(Thumbnail {
        data: webp_data.to_vec(),
        dimensions: (width, height),
    })
}

/// Detect image format from bytes
pub fn detect_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok()
}

/// Upper-case display name, e.g. "JPEG".
pub fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| match *ext {
            "jpg" => "JPEG".to_string(),
            "tif" => "TIFF".to_string(),
            other => other.to_uppercase(),
        })
        .unwrap_or_else(|| format!("{format:?}").to_uppercase())
}
