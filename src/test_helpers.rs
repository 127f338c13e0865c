//! Shared test utilities for the sizefit test suite.
//!
//! Synthetic images are generated in memory from a fixed integer hash so
//! every run sees identical pixels. Noise is used on purpose: it compresses
//! poorly, which makes encoded sizes large and quality-sensitive.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let asset = jpeg_asset(800, 600, 95);
//! let request = request(asset.declared_size() / 2);
//! ```

use crate::types::{ImageAsset, OptimizationRequest};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::num::NonZeroU64;

// =========================================================================
// Pixel generators
// =========================================================================

/// Deterministic per-pixel hash (xorshift-multiply).
fn hash(x: u32, y: u32, channel: u32) -> u8 {
    let mut v = x
        .wrapping_mul(0x9E37_79B1)
        .wrapping_add(y.wrapping_mul(0x85EB_CA77))
        .wrapping_add(channel.wrapping_mul(0xC2B2_AE3D));
    v ^= v >> 15;
    v = v.wrapping_mul(0x2C1B_3C6D);
    v ^= v >> 12;
    (v & 0xFF) as u8
}

/// RGB noise image.
pub fn noise_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([hash(x, y, 0), hash(x, y, 1), hash(x, y, 2)])
    }))
}

// =========================================================================
// Encoded fixtures
// =========================================================================

pub fn noise_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = noise_image(width, height).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buffer
}

pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Vec::new();
    noise_image(width, height)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

pub fn jpeg_asset(width: u32, height: u32, quality: u8) -> ImageAsset {
    ImageAsset::new(noise_jpeg(width, height, quality), "image/jpeg")
}

pub fn png_asset(width: u32, height: u32) -> ImageAsset {
    ImageAsset::new(noise_png(width, height), "image/png")
}

/// Request with only a byte budget.
pub fn request(max_size_bytes: u64) -> OptimizationRequest {
    OptimizationRequest::new(NonZeroU64::new(max_size_bytes).unwrap())
}
