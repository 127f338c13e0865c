//! Shared types for the optimization pipeline.
//!
//! Inputs ([`ImageAsset`], [`OptimizationRequest`]) are owned by the caller and
//! only ever read. The single output, [`OptimizationResult`], is created once
//! per successful call and handed over in full.

use crate::imaging::Quality;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Media types the pipeline can decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    WebP,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Jpeg, MediaType::Png, MediaType::WebP];

    /// Parse a declared MIME type. Parameters after `;` are ignored.
    ///
    /// ```
    /// # use sizefit::types::MediaType;
    /// assert_eq!(MediaType::from_mime("image/JPEG"), Some(MediaType::Jpeg));
    /// assert_eq!(MediaType::from_mime("image/gif"), None);
    /// ```
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/webp" => Some(MediaType::WebP),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::WebP => "image/webp",
        }
    }

    /// Canonical file extension for output files.
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Jpeg => "jpg",
            MediaType::Png => "png",
            MediaType::WebP => "webp",
        }
    }

    /// Whether the encoder has a continuous quality axis.
    ///
    /// PNG is lossless: quality is a no-op and every encode at the same
    /// dimensions yields the same size.
    pub fn is_lossy(self) -> bool {
        !matches!(self, MediaType::Png)
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            MediaType::Jpeg => image::ImageFormat::Jpeg,
            MediaType::Png => image::ImageFormat::Png,
            MediaType::WebP => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// An input image as received from the caller.
///
/// The declared media type is kept verbatim so the validator can reject
/// types outside the accepted set. Bytes are shared, never copied or mutated.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    bytes: Arc<[u8]>,
    media_type: String,
    declared_size: u64,
}

impl ImageAsset {
    /// Create an asset whose declared size is the length of `bytes`.
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        let declared_size = bytes.len() as u64;
        Self {
            bytes,
            media_type: media_type.into(),
            declared_size,
        }
    }

    /// Override the declared size (e.g. from an upload form's metadata).
    pub fn with_declared_size(mut self, declared_size: u64) -> Self {
        self.declared_size = declared_size;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap handle to the byte buffer for work moved onto another thread.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

/// What the caller wants: a byte budget plus optional encode and size hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub max_size_bytes: NonZeroU64,
    /// Initial encode quality. `None` uses the search policy's start quality.
    pub quality: Option<Quality>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub maintain_aspect_ratio: bool,
}

impl OptimizationRequest {
    pub fn new(max_size_bytes: NonZeroU64) -> Self {
        Self {
            max_size_bytes,
            quality: None,
            max_width: None,
            max_height: None,
            maintain_aspect_ratio: true,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = Some(max_width);
        self
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }

    pub fn with_maintain_aspect_ratio(mut self, maintain: bool) -> Self {
        self.maintain_aspect_ratio = maintain;
        self
    }

    pub fn budget(&self) -> u64 {
        self.max_size_bytes.get()
    }
}

/// Encoded output bytes, always in the media type of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    pub bytes: Arc<[u8]>,
    pub media_type: MediaType,
}

/// Which phase of the search produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SearchStage {
    /// Input already fit the budget; returned untouched.
    PassThrough,
    /// Met the budget at the planned full dimensions.
    QualitySearch,
    /// Met the budget at a fallback ladder tier (0-based).
    DimensionFallback { tier: usize },
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStage::PassThrough => f.write_str("pass-through"),
            SearchStage::QualitySearch => f.write_str("quality search"),
            SearchStage::DimensionFallback { tier } => write!(f, "fallback tier {}", tier + 1),
        }
    }
}

/// One encode try. Lives only inside a single search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
    /// `None` when the encoder failed; counts as infinitely large.
    pub size_bytes: Option<u64>,
}

/// Successful outcome of an optimization call.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub encoded: EncodedAsset,
    pub original_size: u64,
    pub optimized_size: u64,
    pub compression_ratio_percent: f64,
    /// `0x0` when a pass-through could not read the header.
    pub final_width: u32,
    pub final_height: u32,
    /// Quality of the winning encode; `None` for pass-through.
    pub final_quality: Option<Quality>,
    pub stage: SearchStage,
}

/// `(original - optimized) / original * 100`, never negative.
pub fn compression_ratio_percent(original_size: u64, optimized_size: u64) -> f64 {
    if original_size == 0 || optimized_size >= original_size {
        return 0.0;
    }
    (original_size - optimized_size) as f64 / original_size as f64 * 100.0
}
