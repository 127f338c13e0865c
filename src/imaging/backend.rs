//! Raster backend trait and shared types.
//!
//! The [`RasterBackend`] trait defines the three operations the search
//! controller needs: identify (header-only), decode, and encode. Decode and
//! encode are asynchronous; they are the only suspension points of an
//! optimization call.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::EncodeParams;
use crate::types::{ImageAsset, MediaType};
use image::DynamicImage;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Natural pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Source pixels decoded once per optimization call.
///
/// Every attempt resamples from these pixels; nothing is accumulated across
/// attempts.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Arc<DynamicImage>,
    pub dimensions: Dimensions,
    pub media_type: MediaType,
}

/// Trait for raster backends.
///
/// Futures must be `Send` so independent optimization calls can run as
/// separate tasks.
pub trait RasterBackend: Sync {
    /// Read dimensions from the header without decoding pixel data.
    fn identify(&self, asset: &ImageAsset, media_type: MediaType)
    -> Result<Dimensions, BackendError>;

    /// Decode the asset's bytes as `media_type`.
    fn decode(
        &self,
        asset: &ImageAsset,
        media_type: MediaType,
    ) -> impl Future<Output = Result<DecodedImage, BackendError>> + Send;

    /// Resample `source` to the requested size and encode it.
    fn encode(
        &self,
        source: &DecodedImage,
        params: &EncodeParams,
    ) -> impl Future<Output = Result<Vec<u8>, BackendError>> + Send;
}
