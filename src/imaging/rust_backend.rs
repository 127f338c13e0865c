//! Pure Rust raster backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, WebP) | `image::load_from_memory_with_format` |
//! | Resample | `image::imageops` `Lanczos3` via `DynamicImage::resize_exact` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality 1–100) |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (lossless, quality ignored) |
//! | Encode → WebP | `webp::Encoder` (libwebp lossy, quality 1–100) |
//!
//! Decode and encode are CPU-bound, so both run on tokio's blocking pool and
//! the calling task suspends until they finish. Each resampled buffer is
//! owned by its attempt and dropped as soon as that attempt's encode returns.

use super::backend::{BackendError, DecodedImage, Dimensions, RasterBackend};
use super::params::{EncodeParams, Quality};
use crate::types::{ImageAsset, MediaType};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use std::io::Cursor;
use std::sync::Arc;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode raw bytes as the declared format. No format sniffing: a PNG
/// declared as JPEG is a decode failure.
fn decode_bytes(bytes: &[u8], media_type: MediaType) -> Result<DynamicImage, BackendError> {
    image::load_from_memory_with_format(bytes, media_type.image_format())
        .map_err(|e| BackendError::Decode(format!("not a valid {}: {}", media_type, e)))
}

/// Resample (if needed) and encode one attempt.
fn encode_pixels(source: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
    if params.width == 0 || params.height == 0 {
        return Err(BackendError::Encode(format!(
            "invalid target size {}x{}",
            params.width, params.height
        )));
    }

    let resized;
    let img = if (source.width(), source.height()) == (params.width, params.height) {
        source
    } else {
        resized = source.resize_exact(params.width, params.height, FilterType::Lanczos3);
        &resized
    };

    match params.media_type {
        MediaType::Jpeg => encode_jpeg(img, params.quality),
        MediaType::Png => encode_png(img),
        MediaType::WebP => encode_webp(img, params.quality),
    }
}

fn encode_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.percent())
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| BackendError::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(buffer)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, BackendError> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buffer),
        CompressionType::Default,
        PngFilter::Adaptive,
    );
    img.write_with_encoder(encoder)
        .map_err(|e| BackendError::Encode(format!("PNG encode failed: {}", e)))?;
    Ok(buffer)
}

fn encode_webp(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_simple(false, f32::from(quality.percent()))
        .map_err(|e| BackendError::Encode(format!("WebP encode failed: {:?}", e)))?;
    Ok(memory.to_vec())
}

impl RasterBackend for RustBackend {
    fn identify(
        &self,
        asset: &ImageAsset,
        media_type: MediaType,
    ) -> Result<Dimensions, BackendError> {
        let (width, height) =
            ImageReader::with_format(Cursor::new(asset.bytes()), media_type.image_format())
                .into_dimensions()
                .map_err(|e| {
                    BackendError::Decode(format!("unreadable {} header: {}", media_type, e))
                })?;
        Ok(Dimensions { width, height })
    }

    async fn decode(
        &self,
        asset: &ImageAsset,
        media_type: MediaType,
    ) -> Result<DecodedImage, BackendError> {
        let bytes = asset.shared_bytes();
        let pixels = tokio::task::spawn_blocking(move || decode_bytes(&bytes, media_type))
            .await
            .map_err(|e| BackendError::Decode(format!("decode task failed: {}", e)))??;

        Ok(DecodedImage {
            dimensions: Dimensions {
                width: pixels.width(),
                height: pixels.height(),
            },
            pixels: Arc::new(pixels),
            media_type,
        })
    }

    async fn encode(
        &self,
        source: &DecodedImage,
        params: &EncodeParams,
    ) -> Result<Vec<u8>, BackendError> {
        let pixels = Arc::clone(&source.pixels);
        let params = *params;
        tokio::task::spawn_blocking(move || encode_pixels(&pixels, &params))
            .await
            .map_err(|e| BackendError::Encode(format!("encode task failed: {}", e)))?
    }
}
