//! # sizefit
//!
//! Fit raster images under a hard byte budget while giving up as little
//! quality as possible.
//!
//! Given an image (JPEG, PNG, or WebP) and a budget, [`optimize::optimize`]
//! runs a deterministic search and returns an encoding in the **same media
//! type** whose size is at or under the budget, or a typed error explaining
//! why none exists.
//!
//! # The Search
//!
//! ```text
//! declared size ≤ budget ──────────────────────────────► pass through
//!        │
//!        ▼
//! decode once
//!        │
//!        ▼
//! quality 0.9, 0.8, … 0.2 at full size ───── fits ─────► result
//!        │ exhausted
//!        ▼
//! fit 1200x800 @ 0.7 ─────────────────────── fits ─────► result
//!        │
//!        ▼
//! fit 800x600 @ 0.5 ──────────────────────── fits ─────► result
//!        │
//!        ▼
//! BudgetExceeded { best_size }
//! ```
//!
//! Every step is a pure function of the input bytes, the request, and the
//! [`optimize::SearchPolicy`], so the same input always produces the same
//! attempts in the same order. A failed encode counts as an attempt of
//! infinite size; the search moves on.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Shared types: `MediaType`, `ImageAsset`, `OptimizationRequest`, `OptimizationResult` |
//! | [`validate`] | Accepted media types and extension → MIME mapping |
//! | [`imaging`] | Dimension planning, the [`imaging::RasterBackend`] seam, and the `image`-crate backend |
//! | [`optimize`] | The search controller and its typed errors |
//! | [`cache`] | Content-addressed result cache with a TTL |
//! | [`transport`] | [`transport::AssetSink`]: where optimized bytes are handed off |
//! | [`process`] | Batch driver: walks inputs, consults the cache, optimizes concurrently |
//! | [`config`] | `sizefit.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Concurrency
//!
//! Attempts within one call are strictly sequential; the next step depends on
//! the previous size. Decode and encode are the only suspension points and
//! run on tokio's blocking pool. Independent calls share nothing but the
//! read-only backend, so the batch driver runs several at once.
//!
//! # Example
//!
//! ```no_run
//! use sizefit::imaging::RustBackend;
//! use sizefit::optimize::optimize;
//! use sizefit::types::{ImageAsset, OptimizationRequest};
//! use std::num::NonZeroU64;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("photo.jpg")?;
//! let asset = ImageAsset::new(bytes, "image/jpeg");
//! let request = OptimizationRequest::new(NonZeroU64::new(500 * 1024).ok_or("zero budget")?)
//!     .with_max_width(2048);
//!
//! let result = optimize(&RustBackend::new(), &asset, &request).await?;
//! println!("{} -> {} bytes ({})", result.original_size, result.optimized_size, result.stage);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod imaging;
pub mod optimize;
pub mod output;
pub mod process;
pub mod transport;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;
