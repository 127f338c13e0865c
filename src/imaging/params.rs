//! Parameter types for encode attempts.
//!
//! These structs describe *what* to encode, not *how*. They are the interface
//! between the search controller (which decides the next attempt) and the
//! [`backend`](super::backend) (which does the pixel work), so a mock backend
//! can stand in during tests.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality as a fraction in (0, 1]. Clamped on construction.
//! - [`Bounds`]: Optional maximum width/height for the dimension planner.
//! - [`EncodeParams`]: Everything one attempt needs: target size, quality, output type.

use crate::types::MediaType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest quality the encoders are ever asked for.
const MIN_QUALITY: f32 = 0.01;

/// Quality setting for lossy image encoding, as a fraction in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Quality(f32);

impl Quality {
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::default();
        }
        Self(value.clamp(MIN_QUALITY, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Integer quality on the 1–100 scale used by the codecs.
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(0.9)
    }
}

impl From<f32> for Quality {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for f32 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Upper bounds for the dimension planner. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl Bounds {
    pub fn new(max_width: Option<u32>, max_height: Option<u32>) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_width.is_none() && self.max_height.is_none()
    }

    /// Tightest combination of two bounds, per axis.
    pub fn intersect(self, other: Bounds) -> Bounds {
        fn tighter(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }
        Bounds {
            max_width: tighter(self.max_width, other.max_width),
            max_height: tighter(self.max_height, other.max_height),
        }
    }
}

/// Parameters for a single encode attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
    pub media_type: MediaType,
}
