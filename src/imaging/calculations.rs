//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::Bounds;

/// Plan downscaled dimensions that respect `bounds`.
///
/// Downscale only: neither output dimension ever exceeds the original. With
/// `maintain_aspect_ratio`, width is fitted first and then height, using
/// floating-point ratios and rounding once at the end. Without it, each axis
/// is clamped independently.
///
/// # Examples
/// ```
/// # use sizefit::imaging::{Bounds, plan_dimensions};
/// let bounds = Bounds::new(Some(1200), Some(800));
/// assert_eq!(plan_dimensions((4000, 3000), bounds, true), (1067, 800));
/// assert_eq!(plan_dimensions((640, 480), bounds, true), (640, 480));
/// ```
pub fn plan_dimensions(original: (u32, u32), bounds: Bounds, maintain_aspect_ratio: bool) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    if bounds.is_unbounded() || orig_w == 0 || orig_h == 0 {
        return original;
    }

    if !maintain_aspect_ratio {
        let w = bounds.max_width.map_or(orig_w, |max| orig_w.min(max.max(1)));
        let h = bounds.max_height.map_or(orig_h, |max| orig_h.min(max.max(1)));
        return (w, h);
    }

    let mut w = orig_w as f64;
    let mut h = orig_h as f64;

    if let Some(max_w) = bounds.max_width
        && w > max_w as f64
    {
        let ratio = max_w as f64 / w;
        w *= ratio;
        h *= ratio;
    }

    if let Some(max_h) = bounds.max_height
        && h > max_h as f64
    {
        let ratio = max_h as f64 / h;
        w *= ratio;
        h *= ratio;
    }

    (round_dimension(w, orig_w), round_dimension(h, orig_h))
}

/// Round a scaled dimension, keeping it within `1..=original`.
fn round_dimension(value: f64, original: u32) -> u32 {
    (value.round() as u32).clamp(1, original)
}
