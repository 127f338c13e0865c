//! End-to-end tests against the real `image`-crate backend.
//!
//! Fixtures are deterministic noise, which compresses poorly: sizes are large
//! and respond clearly to quality and dimension changes.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sizefit::cache::CacheManifest;
use sizefit::imaging::{EncodeParams, Quality, RasterBackend, RustBackend};
use sizefit::optimize::{OptimizeError, optimize};
use sizefit::process::{self, FileOutcome, ProcessOptions};
use sizefit::types::{ImageAsset, MediaType, OptimizationRequest, SearchStage};
use std::io::Cursor;
use std::num::NonZeroU64;
use std::time::Duration;
use tempfile::TempDir;

fn noise(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let mut v = x.wrapping_mul(0x9E37_79B1) ^ y.wrapping_mul(0x85EB_CA77);
        v ^= v >> 15;
        v = v.wrapping_mul(0x2C1B_3C6D);
        v ^= v >> 12;
        Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    }))
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
    buffer
}

fn budget(bytes: u64) -> OptimizationRequest {
    OptimizationRequest::new(NonZeroU64::new(bytes).unwrap())
}

/// Size the backend produces for `asset` at full size and `quality`.
async fn full_size_at(backend: &RustBackend, asset: &ImageAsset, quality: f32) -> u64 {
    let decoded = backend.decode(asset, MediaType::Jpeg).await.unwrap();
    let params = EncodeParams {
        width: decoded.dimensions.width,
        height: decoded.dimensions.height,
        quality: Quality::new(quality),
        media_type: MediaType::Jpeg,
    };
    backend.encode(&decoded, &params).await.unwrap().len() as u64
}

#[tokio::test]
async fn jpeg_fits_budget_by_lowering_quality() {
    let backend = RustBackend::new();
    let asset = ImageAsset::new(encode(&noise(400, 300), ImageFormat::Jpeg), "image/jpeg");

    let target = full_size_at(&backend, &asset, 0.5).await;
    assert!(target < asset.declared_size());

    let result = optimize(&backend, &asset, &budget(target)).await.unwrap();

    assert_eq!(result.stage, SearchStage::QualitySearch);
    assert!(result.optimized_size <= target);
    assert_eq!((result.final_width, result.final_height), (400, 300));
    assert!(result.final_quality.unwrap().percent() >= 50);
    assert_eq!(result.encoded.media_type, MediaType::Jpeg);
    image::load_from_memory_with_format(&result.encoded.bytes, ImageFormat::Jpeg).unwrap();
}

#[tokio::test]
async fn png_falls_back_to_first_ladder_tier() {
    let backend = RustBackend::new();
    let asset = ImageAsset::new(encode(&noise(1600, 1200), ImageFormat::Png), "image/png");
    let request = budget(4 * 1024 * 1024);
    assert!(asset.declared_size() > request.budget());

    let result = optimize(&backend, &asset, &request).await.unwrap();

    assert_eq!(result.stage, SearchStage::DimensionFallback { tier: 0 });
    assert_eq!((result.final_width, result.final_height), (1067, 800));
    assert!(result.optimized_size <= request.budget());

    let decoded =
        image::load_from_memory_with_format(&result.encoded.bytes, ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1067, 800));
}

#[tokio::test]
async fn webp_stays_webp() {
    let backend = RustBackend::new();
    let asset = ImageAsset::new(encode(&noise(320, 240), ImageFormat::WebP), "image/webp");
    let request = budget(asset.declared_size() / 2);

    let result = optimize(&backend, &asset, &request).await.unwrap();

    assert!(result.optimized_size <= request.budget());
    assert_eq!(result.encoded.media_type, MediaType::WebP);
    image::load_from_memory_with_format(&result.encoded.bytes, ImageFormat::WebP).unwrap();
}

#[tokio::test]
async fn under_budget_passes_through_unchanged() {
    let bytes = encode(&noise(64, 48), ImageFormat::Png);
    let asset = ImageAsset::new(bytes.clone(), "image/png");

    let result = optimize(&RustBackend::new(), &asset, &budget(10 * 1024 * 1024))
        .await
        .unwrap();

    assert_eq!(result.stage, SearchStage::PassThrough);
    assert_eq!(&*result.encoded.bytes, bytes.as_slice());
    assert_eq!((result.final_width, result.final_height), (64, 48));
    assert_eq!(result.compression_ratio_percent, 0.0);
    assert_eq!(result.final_quality, None);
}

#[tokio::test]
async fn impossible_budget_reports_best_size() {
    let asset = ImageAsset::new(encode(&noise(64, 48), ImageFormat::Jpeg), "image/jpeg");

    let err = optimize(&RustBackend::new(), &asset, &budget(10))
        .await
        .unwrap_err();

    match err {
        OptimizeError::BudgetExceeded {
            original_size,
            max_size,
            best_size,
        } => {
            assert_eq!(original_size, asset.declared_size());
            assert_eq!(max_size, 10);
            assert!(best_size > 10);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn gif_is_rejected_before_decoding() {
    let asset = ImageAsset::new(b"GIF89a....".to_vec(), "image/gif");
    let err = optimize(&RustBackend::new(), &asset, &budget(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::InvalidFileType { media_type } if media_type == "image/gif"));
}

#[tokio::test]
async fn truncated_jpeg_is_decode_failure() {
    let mut bytes = encode(&noise(200, 150), ImageFormat::Jpeg);
    bytes.truncate(20);
    let asset = ImageAsset::new(bytes, "image/jpeg").with_declared_size(50_000);

    let err = optimize(&RustBackend::new(), &asset, &budget(1000))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::DecodeFailure(_)));
}

#[tokio::test]
async fn batch_run_writes_outputs_and_reuses_cache() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let big = encode(&noise(400, 300), ImageFormat::Jpeg);
    let target = full_size_at(
        &RustBackend::new(),
        &ImageAsset::new(big.clone(), "image/jpeg"),
        0.5,
    )
    .await;
    std::fs::write(src.path().join("big.jpg"), big).unwrap();
    std::fs::write(
        src.path().join("small.png"),
        encode(&noise(16, 16), ImageFormat::Png),
    )
    .unwrap();
    std::fs::write(src.path().join("anim.gif"), b"GIF89a").unwrap();

    let options = ProcessOptions {
        inputs: vec![src.path().to_path_buf()],
        output_dir: out.path().to_path_buf(),
        request: budget(target),
        policy: Default::default(),
        max_concurrent: 2,
        use_cache: true,
        cache_ttl: Duration::from_secs(3600),
    };

    let first = process::process(&options, None).await.unwrap();
    let names: Vec<&str> = first.files.iter().map(|f| f.output_name.as_str()).collect();
    assert_eq!(names, vec!["anim.gif", "big.jpg", "small.png"]);
    assert!(first.files[0].is_failure());
    assert!(matches!(
        first.files[2].outcome,
        FileOutcome::Optimized {
            stage: SearchStage::PassThrough,
            ..
        }
    ));
    let big = std::fs::read(out.path().join("big.jpg")).unwrap();
    assert!(big.len() as u64 <= target);

    let manifest = CacheManifest::load(out.path(), options.cache_ttl);
    assert_eq!(manifest.entries.len(), 2);

    let second = process::process(&options, None).await.unwrap();
    assert_eq!(second.cache_stats.hits, 2);
    assert!(matches!(
        second.files[1].outcome,
        FileOutcome::Cached { copied: false, .. }
    ));
}
