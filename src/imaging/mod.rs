//! Raster operations: decode, resample, encode.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Decode** | `image::load_from_memory_with_format` |
//! | **Resample** | Lanczos3 `resize_exact` |
//! | **Encode** | `image` JPEG/PNG encoders, `webp` for lossy WebP |
//!
//! The module is split into:
//! - **Calculations**: Pure dimension planning (unit testable)
//! - **Parameters**: Data structures describing an encode attempt
//! - **Backend**: [`RasterBackend`] trait + [`RustBackend`]
//! - **Operations**: Helpers combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, DecodedImage, Dimensions, RasterBackend};
pub use calculations::plan_dimensions;
pub use operations::{EncodedAttempt, encode_attempt, get_dimensions, plan_attempt};
pub use params::{Bounds, EncodeParams, Quality};
pub use rust_backend::RustBackend;
