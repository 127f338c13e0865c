//! Budget-driven search for an encoding that fits under `max_size_bytes`.
//!
//! ## States
//!
//! ```text
//! PassThrough ──(declared size ≤ budget)──────────────────────────▶ Success
//!      │
//!      ▼ decode once
//! QualitySearch   q = 0.9, 0.8, … while q > 0.1, at the planned full size
//!      │ exhausted
//!      ▼
//! DimensionFallback   fixed ladder: (1200×800 @ 0.7), (800×600 @ 0.5)
//!      │ exhausted
//!      ▼
//! BudgetExceeded (carries the smallest size seen)
//! ```
//!
//! Quality is always exhausted before dimensions shrink, and ladder tiers are
//! tried in their configured order regardless of how close earlier attempts
//! came. The search is a fixed sequence, not an optimizer: given a
//! deterministic backend the same input always yields the same result.
//!
//! ## Failure handling
//!
//! - An undeclared or unsupported media type fails before any decode.
//! - Pass-through never decodes, so a malformed file under budget comes back
//!   unchanged.
//! - A decode failure ends the call; no attempt can salvage a corrupt source.
//! - An encode failure only sinks its own attempt. It counts as an
//!   infinitely large result and the search moves on. If no attempt ever
//!   produced output the call fails with the last encoder message.
//!
//! ## Suspension points
//!
//! The only `.await`s are the backend's `decode` (once) and `encode` (once
//! per attempt). Attempts are strictly sequential: each depends on the
//! previous outcome.

use crate::imaging::{
    BackendError, Bounds, DecodedImage, EncodeParams, EncodedAttempt, Quality, RasterBackend,
    encode_attempt, get_dimensions, plan_attempt,
};
use crate::types::{
    Attempt, EncodedAsset, ImageAsset, MediaType, OptimizationRequest, OptimizationResult,
    SearchStage, compression_ratio_percent,
};
use crate::validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Absorbs float error so a step landing exactly on the cutoff is excluded.
const QUALITY_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("invalid file type '{media_type}' (accepted: image/jpeg, image/png, image/webp)")]
    InvalidFileType { media_type: String },
    #[error("decode failed: {0}")]
    DecodeFailure(String),
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    #[error(
        "budget exceeded: {original_size} bytes could not be brought under {max_size} bytes (best attempt: {best_size} bytes)"
    )]
    BudgetExceeded {
        original_size: u64,
        max_size: u64,
        best_size: u64,
    },
}

fn decode_failure(err: BackendError) -> OptimizeError {
    match err {
        BackendError::Decode(message) => OptimizeError::DecodeFailure(message),
        other => OptimizeError::DecodeFailure(other.to_string()),
    }
}

/// One rung of the dimension fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackTier {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: Quality,
}

impl FallbackTier {
    pub fn new(max_width: u32, max_height: u32, quality: f32) -> Self {
        Self {
            max_width,
            max_height,
            quality: Quality::new(quality),
        }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(Some(self.max_width), Some(self.max_height))
    }
}

/// Tunables of the search. The defaults are the documented fixed sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPolicy {
    /// First quality tried when the request does not supply one.
    pub start_quality: Quality,
    /// Amount subtracted from quality after each failed attempt.
    pub quality_step: f32,
    /// Quality search continues while quality is strictly above this.
    pub quality_cutoff: f32,
    pub ladder: Vec<FallbackTier>,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            start_quality: Quality::new(0.9),
            quality_step: 0.1,
            quality_cutoff: 0.1,
            ladder: vec![FallbackTier::new(1200, 800, 0.7), FallbackTier::new(800, 600, 0.5)],
        }
    }
}

impl SearchPolicy {
    /// Qualities tried at full size, in order.
    ///
    /// Each value is `start - i * step` computed fresh, so drift does not
    /// accumulate across steps.
    pub fn quality_steps(&self, start: Option<Quality>) -> Vec<Quality> {
        let start = f64::from(start.unwrap_or(self.start_quality).value());
        let step = f64::from(self.quality_step);
        let cutoff = f64::from(self.quality_cutoff) + QUALITY_EPSILON;

        if step <= 0.0 {
            return if start > cutoff {
                vec![Quality::new(start as f32)]
            } else {
                Vec::new()
            };
        }

        (0u32..)
            .map(|i| start - step * f64::from(i))
            .take_while(|q| *q > cutoff)
            .map(|q| Quality::new(q as f32))
            .collect()
    }
}

/// Optimize with the default search policy.
pub async fn optimize(
    backend: &impl RasterBackend,
    asset: &ImageAsset,
    request: &OptimizationRequest,
) -> Result<OptimizationResult, OptimizeError> {
    optimize_with_policy(backend, asset, request, &SearchPolicy::default()).await
}

/// Fit `asset` under the request's budget using `policy`.
///
/// See the [module docs](self) for the state sequence.
pub async fn optimize_with_policy(
    backend: &impl RasterBackend,
    asset: &ImageAsset,
    request: &OptimizationRequest,
    policy: &SearchPolicy,
) -> Result<OptimizationResult, OptimizeError> {
    let media_type =
        validate::media_type(asset).ok_or_else(|| OptimizeError::InvalidFileType {
            media_type: asset.media_type().to_string(),
        })?;
    let original_size = asset.declared_size();
    let budget = request.budget();

    if original_size <= budget {
        return Ok(pass_through(backend, asset, media_type));
    }

    let source = backend
        .decode(asset, media_type)
        .await
        .map_err(decode_failure)?;
    debug!(
        width = source.dimensions.width,
        height = source.dimensions.height,
        media = %media_type,
        "decoded source"
    );

    let mut search = Search::new(backend, &source, original_size, budget);
    let request_bounds = Bounds::new(request.max_width, request.max_height);
    let aspect = request.maintain_aspect_ratio;

    // Full-size dimensions are planned once; only quality varies.
    let full_size = plan_attempt(&source, request_bounds, aspect, Quality::default());
    for quality in policy.quality_steps(request.quality) {
        let params = EncodeParams { quality, ..full_size };
        if let Some(hit) = search.attempt(params).await {
            return Ok(search.finish(hit, SearchStage::QualitySearch));
        }
    }

    for (tier, step) in policy.ladder.iter().enumerate() {
        let bounds = request_bounds.intersect(step.bounds());
        let params = plan_attempt(&source, bounds, aspect, step.quality);
        if let Some(hit) = search.attempt(params).await {
            return Ok(search.finish(hit, SearchStage::DimensionFallback { tier }));
        }
    }

    Err(search.exhausted())
}

/// Return the asset untouched. Dimensions come from a header read that
/// never decides the outcome: an unreadable header reports `0x0`.
fn pass_through(
    backend: &impl RasterBackend,
    asset: &ImageAsset,
    media_type: MediaType,
) -> OptimizationResult {
    let (width, height) = get_dimensions(backend, asset, media_type).unwrap_or_else(|e| {
        warn!(error = %e, "header unreadable, passing through with unknown dimensions");
        (0, 0)
    });
    let original_size = asset.declared_size();
    debug!(size = original_size, "already under budget, passing through");

    OptimizationResult {
        encoded: EncodedAsset {
            bytes: asset.shared_bytes(),
            media_type,
        },
        original_size,
        optimized_size: original_size,
        compression_ratio_percent: 0.0,
        final_width: width,
        final_height: height,
        final_quality: None,
        stage: SearchStage::PassThrough,
    }
}

/// Bookkeeping for one optimization call.
struct Search<'a, B> {
    backend: &'a B,
    source: &'a DecodedImage,
    original_size: u64,
    budget: u64,
    attempts: Vec<Attempt>,
    last_error: Option<String>,
}

impl<'a, B: RasterBackend> Search<'a, B> {
    fn new(backend: &'a B, source: &'a DecodedImage, original_size: u64, budget: u64) -> Self {
        Self {
            backend,
            source,
            original_size,
            budget,
            attempts: Vec::new(),
            last_error: None,
        }
    }

    /// Run one attempt. Returns the encoded output if it fits the budget.
    async fn attempt(&mut self, params: EncodeParams) -> Option<EncodedAttempt> {
        // Lossless output does not depend on quality: a size that already
        // failed at these dimensions fails again.
        if !params.media_type.is_lossy()
            && let Some(prior) = self
                .attempts
                .iter()
                .find(|a| (a.width, a.height) == (params.width, params.height))
                .copied()
        {
            debug!(
                width = params.width,
                height = params.height,
                quality = %params.quality,
                "lossless size already known, skipping encode"
            );
            self.record(&params, prior.size_bytes);
            return None;
        }

        match encode_attempt(self.backend, self.source, params).await {
            Ok(encoded) => {
                let size = encoded.size();
                self.record(&params, Some(size));
                if size <= self.budget {
                    Some(encoded)
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(
                    width = params.width,
                    height = params.height,
                    quality = %params.quality,
                    error = %e,
                    "encode attempt failed, continuing"
                );
                self.last_error = Some(e.to_string());
                self.record(&params, None);
                None
            }
        }
    }

    fn record(&mut self, params: &EncodeParams, size_bytes: Option<u64>) {
        debug!(
            attempt = self.attempts.len() + 1,
            width = params.width,
            height = params.height,
            quality = %params.quality,
            size = ?size_bytes,
            budget = self.budget,
            "encode attempt"
        );
        self.attempts.push(Attempt {
            quality: params.quality,
            width: params.width,
            height: params.height,
            size_bytes,
        });
    }

    fn best_size(&self) -> Option<u64> {
        self.attempts.iter().filter_map(|a| a.size_bytes).min()
    }

    fn finish(self, hit: EncodedAttempt, stage: SearchStage) -> OptimizationResult {
        let optimized_size = hit.size();
        let ratio = compression_ratio_percent(self.original_size, optimized_size);
        info!(
            original = self.original_size,
            optimized = optimized_size,
            ratio = format_args!("{:.1}%", ratio),
            width = hit.params.width,
            height = hit.params.height,
            quality = %hit.params.quality,
            attempts = self.attempts.len(),
            %stage,
            "fit under budget"
        );

        OptimizationResult {
            encoded: EncodedAsset {
                bytes: hit.bytes.into(),
                media_type: hit.params.media_type,
            },
            original_size: self.original_size,
            optimized_size,
            compression_ratio_percent: ratio,
            final_width: hit.params.width,
            final_height: hit.params.height,
            final_quality: Some(hit.params.quality),
            stage,
        }
    }

    fn exhausted(self) -> OptimizeError {
        match self.best_size() {
            Some(best_size) => {
                info!(
                    original = self.original_size,
                    budget = self.budget,
                    best = best_size,
                    attempts = self.attempts.len(),
                    "search exhausted"
                );
                OptimizeError::BudgetExceeded {
                    original_size: self.original_size,
                    max_size: self.budget,
                    best_size,
                }
            }
            None => OptimizeError::EncodeFailure(
                self.last_error
                    .unwrap_or_else(|| "search policy produced no attempts".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::request;
    use std::collections::HashMap;

    fn asset(mime: &str, declared: u64) -> ImageAsset {
        ImageAsset::new(vec![7u8; 16], mime).with_declared_size(declared)
    }

    fn encode_ops(backend: &MockBackend) -> Vec<(u32, u32, u8)> {
        backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Encode {
                    width,
                    height,
                    quality,
                } => Some((width, height, quality)),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // SearchPolicy::quality_steps
    // =========================================================================

    #[test]
    fn default_quality_steps_run_0_9_down_to_0_2() {
        let steps: Vec<u8> = SearchPolicy::default()
            .quality_steps(None)
            .iter()
            .map(|q| q.percent())
            .collect();
        assert_eq!(steps, vec![90, 80, 70, 60, 50, 40, 30, 20]);
    }

    #[test]
    fn quality_steps_start_from_request() {
        let steps: Vec<u8> = SearchPolicy::default()
            .quality_steps(Some(Quality::new(0.75)))
            .iter()
            .map(|q| q.percent())
            .collect();
        assert_eq!(steps, vec![75, 65, 55, 45, 35, 25, 15]);
    }

    #[test]
    fn quality_steps_exclude_cutoff() {
        let steps = SearchPolicy::default().quality_steps(Some(Quality::new(0.2)));
        assert_eq!(steps.len(), 1);
        assert!(SearchPolicy::default()
            .quality_steps(Some(Quality::new(0.1)))
            .is_empty());
    }

    #[test]
    fn quality_steps_zero_step_tries_once() {
        let policy = SearchPolicy {
            quality_step: 0.0,
            ..SearchPolicy::default()
        };
        assert_eq!(policy.quality_steps(None).len(), 1);
    }

    // =========================================================================
    // Pass-through
    // =========================================================================

    #[tokio::test]
    async fn under_budget_passes_through_without_encoding() {
        let backend = MockBackend::with_constant_size(1024, 768, 1);
        let input = asset("image/jpeg", 500);

        let result = optimize(&backend, &input, &request(5000)).await.unwrap();

        assert_eq!(result.stage, SearchStage::PassThrough);
        assert_eq!(&*result.encoded.bytes, input.bytes());
        assert_eq!(result.optimized_size, 500);
        assert_eq!(result.compression_ratio_percent, 0.0);
        assert_eq!((result.final_width, result.final_height), (1024, 768));
        assert_eq!(result.final_quality, None);
        assert_eq!(backend.get_operations(), vec![RecordedOp::Identify]);
    }

    #[tokio::test]
    async fn unreadable_header_still_passes_through() {
        let backend = MockBackend::with_constant_size(10, 10, 1).failing_identify("bad header");
        let input = asset("image/png", 500);

        let result = optimize(&backend, &input, &request(5000)).await.unwrap();

        assert_eq!(result.stage, SearchStage::PassThrough);
        assert_eq!(&*result.encoded.bytes, input.bytes());
        assert_eq!((result.final_width, result.final_height), (0, 0));
        assert_eq!(backend.encode_count(), 0);
    }

    #[tokio::test]
    async fn exactly_at_budget_passes_through() {
        let backend = MockBackend::with_constant_size(10, 10, 1);
        let result = optimize(&backend, &asset("image/png", 5000), &request(5000))
            .await
            .unwrap();
        assert_eq!(result.stage, SearchStage::PassThrough);
        assert_eq!(backend.encode_count(), 0);
    }

    // =========================================================================
    // Quality search
    // =========================================================================

    #[tokio::test]
    async fn quality_search_stops_at_first_fit() {
        let sizes = HashMap::from([
            ((4000, 3000, 90), 8000),
            ((4000, 3000, 80), 6900),
            ((4000, 3000, 70), 5600),
            ((4000, 3000, 60), 4800),
        ]);
        let backend = MockBackend::with_table(4000, 3000, sizes);

        let result = optimize(&backend, &asset("image/jpeg", 10_000), &request(5000))
            .await
            .unwrap();

        assert_eq!(result.stage, SearchStage::QualitySearch);
        assert_eq!((result.final_width, result.final_height), (4000, 3000));
        assert_eq!(result.final_quality.map(Quality::percent), Some(60));
        assert_eq!(result.optimized_size, 4800);
        assert!((result.compression_ratio_percent - 52.0).abs() < 1e-9);
        assert_eq!(result.encoded.media_type, MediaType::Jpeg);
        assert_eq!(backend.encode_count(), 4);
    }

    #[tokio::test]
    async fn quality_search_uses_request_bounds() {
        let backend = MockBackend::with_sizes(4000, 3000, |p| {
            Ok(if p.width <= 2000 { 100 } else { 9000 })
        });
        let req = request(5000).with_max_width(2000);

        let result = optimize(&backend, &asset("image/webp", 10_000), &req)
            .await
            .unwrap();

        assert_eq!((result.final_width, result.final_height), (2000, 1500));
        assert_eq!(encode_ops(&backend), vec![(2000, 1500, 90)]);
    }

    #[tokio::test]
    async fn encode_failure_only_sinks_one_attempt() {
        let sizes = HashMap::from([((800, 600, 80), 100)]);
        let backend = MockBackend::with_table(800, 600, sizes);

        let result = optimize(&backend, &asset("image/jpeg", 10_000), &request(5000))
            .await
            .unwrap();

        assert_eq!(result.final_quality.map(Quality::percent), Some(80));
        assert_eq!(encode_ops(&backend), vec![(800, 600, 90), (800, 600, 80)]);
    }

    // =========================================================================
    // Dimension fallback
    // =========================================================================

    #[tokio::test]
    async fn lossless_falls_back_to_first_tier() {
        let backend = MockBackend::with_sizes(2000, 2000, |p| {
            Ok(if p.width == 2000 { 6000 } else { 1800 })
        });

        let result = optimize(&backend, &asset("image/png", 6000), &request(5000))
            .await
            .unwrap();

        assert_eq!(result.stage, SearchStage::DimensionFallback { tier: 0 });
        assert_eq!((result.final_width, result.final_height), (800, 800));
        assert_eq!(result.final_quality.map(Quality::percent), Some(70));
        assert!((result.compression_ratio_percent - 70.0).abs() < 1e-9);
        // One full-size encode stands in for the whole lossless quality search.
        assert_eq!(encode_ops(&backend), vec![(2000, 2000, 90), (800, 800, 70)]);
    }

    #[tokio::test]
    async fn quality_search_precedes_every_fallback_tier() {
        let backend = MockBackend::with_constant_size(8000, 6000, 5500);

        let err = optimize(&backend, &asset("image/jpeg", 40_000), &request(5000))
            .await
            .unwrap_err();

        let ops = encode_ops(&backend);
        let qualities: Vec<u8> = ops.iter().map(|op| op.2).collect();
        assert_eq!(qualities, vec![90, 80, 70, 60, 50, 40, 30, 20, 70, 50]);
        assert!(ops[..8].iter().all(|op| (op.0, op.1) == (8000, 6000)));
        assert_eq!((ops[8].0, ops[8].1), (1067, 800));
        assert_eq!((ops[9].0, ops[9].1), (800, 600));
        assert!(matches!(err, OptimizeError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn second_tier_used_when_first_misses() {
        let backend = MockBackend::with_sizes(4000, 3000, |p| {
            Ok(if p.width <= 800 { 900 } else { 9000 })
        });

        let result = optimize(&backend, &asset("image/jpeg", 20_000), &request(1000))
            .await
            .unwrap();

        assert_eq!(result.stage, SearchStage::DimensionFallback { tier: 1 });
        assert_eq!((result.final_width, result.final_height), (800, 600));
    }

    #[tokio::test]
    async fn fallback_tier_respects_request_bounds() {
        let backend = MockBackend::with_sizes(4000, 3000, |p| {
            Ok(if p.width < 1000 { 10 } else { 9000 })
        });
        let req = request(1000).with_max_width(1000);

        let result = optimize(&backend, &asset("image/jpeg", 20_000), &req)
            .await
            .unwrap();

        let ops = encode_ops(&backend);
        assert_eq!(ops[0], (1000, 750, 90));
        // Tier 1 alone would plan 1067x800; the request caps it at 1000 wide.
        assert_eq!(ops[8], (1000, 750, 70));
        assert_eq!(ops[9], (800, 600, 50));
        assert_eq!(result.stage, SearchStage::DimensionFallback { tier: 1 });
    }

    #[tokio::test]
    async fn stretch_mode_clamps_each_axis() {
        let backend = MockBackend::with_sizes(4000, 3000, |p| {
            Ok(if p.width < 4000 { 10 } else { 9000 })
        });
        let req = request(1000).with_maintain_aspect_ratio(false);

        let result = optimize(&backend, &asset("image/jpeg", 20_000), &req)
            .await
            .unwrap();

        assert_eq!((result.final_width, result.final_height), (1200, 800));
    }

    // =========================================================================
    // Terminal failures
    // =========================================================================

    #[tokio::test]
    async fn budget_exceeded_reports_best_size() {
        let backend = MockBackend::with_sizes(8000, 6000, |p| {
            Ok(if p.width == 800 { 5500 } else { 7000 })
        });

        let err = optimize(&backend, &asset("image/jpeg", 40_000), &request(5000))
            .await
            .unwrap_err();

        match err {
            OptimizeError::BudgetExceeded {
                original_size,
                max_size,
                best_size,
            } => {
                assert_eq!(original_size, 40_000);
                assert_eq!(max_size, 5000);
                assert_eq!(best_size, 5500);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_type_rejected_before_decode() {
        let backend = MockBackend::with_constant_size(10, 10, 1);

        let err = optimize(&backend, &asset("image/gif", 10_000), &request(5000))
            .await
            .unwrap_err();

        assert!(matches!(err, OptimizeError::InvalidFileType { media_type } if media_type == "image/gif"));
        assert!(backend.get_operations().is_empty());
    }

    #[tokio::test]
    async fn invalid_type_rejected_even_under_budget() {
        let backend = MockBackend::with_constant_size(10, 10, 1);
        let err = optimize(&backend, &asset("image/gif", 10), &request(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidFileType { .. }));
    }

    #[tokio::test]
    async fn decode_failure_stops_search() {
        let backend = MockBackend::with_constant_size(10, 10, 1).failing_decode("truncated");

        let err = optimize(&backend, &asset("image/jpeg", 10_000), &request(5000))
            .await
            .unwrap_err();

        assert!(matches!(err, OptimizeError::DecodeFailure(m) if m == "truncated"));
        assert_eq!(backend.get_operations(), vec![RecordedOp::Decode]);
    }

    #[tokio::test]
    async fn all_encodes_failing_is_encode_failure() {
        let backend = MockBackend::with_sizes(100, 100, |_| Err("codec unavailable".to_string()));

        let err = optimize(&backend, &asset("image/webp", 10_000), &request(5000))
            .await
            .unwrap_err();

        assert!(matches!(err, OptimizeError::EncodeFailure(m) if m.contains("codec unavailable")));
        assert_eq!(backend.encode_count(), 10);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test]
    async fn same_input_gives_identical_result() {
        let run = || async {
            let backend = MockBackend::with_sizes(3000, 2000, |p| {
                Ok(u64::from(p.width) * u64::from(p.quality.percent()) / 10)
            });
            optimize(&backend, &asset("image/jpeg", 50_000), &request(20_000))
                .await
                .unwrap()
        };
        assert_eq!(run().await, run().await);
    }

    #[tokio::test]
    async fn result_never_exceeds_budget_or_original_dimensions() {
        for budget in [100u64, 1000, 5000, 12_000] {
            let backend = MockBackend::with_sizes(3000, 2000, |p| {
                Ok(u64::from(p.width) * u64::from(p.quality.percent()) / 10)
            });
            if let Ok(result) = optimize(&backend, &asset("image/jpeg", 50_000), &request(budget)).await {
                assert!(result.optimized_size <= budget);
                assert!(result.final_width <= 3000 && result.final_height <= 2000);
            }
        }
    }
}
