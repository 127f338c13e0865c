//! High-level image operations.
//!
//! These functions combine calculations with backend execution: plan the
//! target size, call the backend, and measure what came back.

use super::backend::{BackendError, DecodedImage, RasterBackend};
use super::calculations::plan_dimensions;
use super::params::{Bounds, EncodeParams, Quality};
use crate::types::{ImageAsset, MediaType};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(
    backend: &impl RasterBackend,
    asset: &ImageAsset,
    media_type: MediaType,
) -> Result<(u32, u32)> {
    let dims = backend.identify(asset, media_type)?;
    Ok(dims.as_tuple())
}

/// Output of one encode attempt.
#[derive(Debug, Clone)]
pub struct EncodedAttempt {
    pub bytes: Vec<u8>,
    pub params: EncodeParams,
}

impl EncodedAttempt {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Plan an attempt without executing it.
///
/// The target size comes from the decoded source's natural dimensions fitted
/// into `bounds`; the media type is always the source's own.
pub fn plan_attempt(
    source: &DecodedImage,
    bounds: Bounds,
    maintain_aspect_ratio: bool,
    quality: Quality,
) -> EncodeParams {
    let (width, height) =
        plan_dimensions(source.dimensions.as_tuple(), bounds, maintain_aspect_ratio);
    EncodeParams {
        width,
        height,
        quality,
        media_type: source.media_type,
    }
}

/// Encode `source` with `params` and report the resulting bytes.
pub async fn encode_attempt(
    backend: &impl RasterBackend,
    source: &DecodedImage,
    params: EncodeParams,
) -> Result<EncodedAttempt> {
    let bytes = backend.encode(source, &params).await?;
    Ok(EncodedAttempt { bytes, params })
}
