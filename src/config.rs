//! Configuration module.
//!
//! Handles loading, validating, and merging `sizefit.toml`. Stock defaults
//! are overridden by the user's file, which in turn is overridden by CLI
//! flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [budget]
//! max_size = "5MB"              # Byte budget: integer bytes or B/KB/MB/GB (1024-based)
//! # quality = 0.9               # Initial encode quality (0-1]
//! # max_width = 4096            # Never exceed this width
//! # max_height = 4096           # Never exceed this height
//! maintain_aspect_ratio = true
//!
//! [search]
//! start_quality = 0.9           # First quality tried when [budget].quality is unset
//! quality_step = 0.1            # Decrement after each failed attempt
//! quality_cutoff = 0.1          # Keep searching while quality > cutoff
//! ladder = [
//!     { max_width = 1200, max_height = 800, quality = 0.7 },
//!     { max_width = 800, max_height = 600, quality = 0.5 },
//! ]
//!
//! [cache]
//! enabled = true
//! ttl_secs = 604800             # One week
//!
//! [processing]
//! max_concurrent = 4            # Images optimized at once (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Quality;
use crate::optimize::{FallbackTier, SearchPolicy};
use crate::types::OptimizationRequest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "sizefit.toml";

/// Tool configuration loaded from `sizefit.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizefitConfig {
    /// Byte budget and optional size/quality hints.
    pub budget: BudgetConfig,
    /// Quality search and fallback ladder tuning.
    pub search: SearchConfig,
    /// Result cache settings.
    pub cache: CacheConfig,
    /// Concurrency settings.
    pub processing: ProcessingConfig,
}

impl SizefitConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.into()));

        if self.budget.max_size.0 == 0 {
            return invalid("budget.max_size must be greater than zero");
        }
        if let Some(q) = self.budget.quality
            && !is_unit_quality(q)
        {
            return invalid("budget.quality must be in (0, 1]");
        }
        if self.budget.max_width == Some(0) || self.budget.max_height == Some(0) {
            return invalid("budget.max_width/max_height must be non-zero");
        }
        if !is_unit_quality(self.search.start_quality) {
            return invalid("search.start_quality must be in (0, 1]");
        }
        if !(self.search.quality_step > 0.0 && self.search.quality_step <= 1.0) {
            return invalid("search.quality_step must be in (0, 1]");
        }
        if !(0.0..1.0).contains(&self.search.quality_cutoff) {
            return invalid("search.quality_cutoff must be in [0, 1)");
        }
        for tier in &self.search.ladder {
            if tier.max_width == 0 || tier.max_height == 0 {
                return invalid("search.ladder dimensions must be non-zero");
            }
        }
        if self.processing.max_concurrent == Some(0) {
            return invalid("processing.max_concurrent must be at least 1");
        }
        Ok(())
    }

    /// The per-image request described by `[budget]`.
    pub fn to_request(&self) -> OptimizationRequest {
        let max_size = NonZeroU64::new(self.budget.max_size.0).unwrap_or(NonZeroU64::MIN);
        OptimizationRequest {
            max_size_bytes: max_size,
            quality: self.budget.quality.map(Quality::new),
            max_width: self.budget.max_width,
            max_height: self.budget.max_height,
            maintain_aspect_ratio: self.budget.maintain_aspect_ratio,
        }
    }

    /// The search policy described by `[search]`.
    pub fn to_policy(&self) -> SearchPolicy {
        SearchPolicy {
            start_quality: Quality::new(self.search.start_quality),
            quality_step: self.search.quality_step,
            quality_cutoff: self.search.quality_cutoff,
            ladder: self.search.ladder.clone(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

fn is_unit_quality(q: f32) -> bool {
    q > 0.0 && q <= 1.0
}

/// A byte count, written in TOML as an integer or a string with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawByteSize", into = "u64")]
pub struct ByteSize(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Int(u64),
    Text(String),
}

impl TryFrom<RawByteSize> for ByteSize {
    type Error = String;

    fn try_from(raw: RawByteSize) -> Result<Self, Self::Error> {
        match raw {
            RawByteSize::Int(n) => Ok(ByteSize(n)),
            RawByteSize::Text(s) => parse_byte_size(&s).map(ByteSize),
        }
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

/// Parse a human byte size: `"1048576"`, `"500KB"`, `"1.5 MB"`, `"2GiB"`.
///
/// Units are 1024-based and case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte size '{input}'"))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown byte size unit '{other}' in '{input}'")),
    };

    let bytes = (number * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(format!("byte size '{input}' out of range"));
    }
    Ok(bytes as u64)
}

/// Budget and request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    /// Maximum encoded size.
    pub max_size: ByteSize,
    /// Initial quality; falls back to `search.start_quality` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    pub maintain_aspect_ratio: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_size: ByteSize(5 * 1024 * 1024),
            quality: None,
            max_width: None,
            max_height: None,
            maintain_aspect_ratio: true,
        }
    }
}

/// Search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub start_quality: f32,
    pub quality_step: f32,
    pub quality_cutoff: f32,
    /// Fallback tiers, tried in order after the quality search.
    pub ladder: Vec<FallbackTier>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let policy = SearchPolicy::default();
        Self {
            start_quality: policy.start_quality.value(),
            quality_step: policy.quality_step,
            quality_cutoff: policy.quality_cutoff,
            ladder: policy.ladder,
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cached results older than this are recomputed.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Concurrency settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of images optimized at the same time.
    /// When absent, defaults to the number of CPU cores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

/// Resolve how many independent optimizations may be in flight.
///
/// - `None` → number of available cores
/// - `Some(n)` → `n` (at least 1)
pub fn effective_concurrency(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_concurrent.unwrap_or(cores).max(1)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SizefitConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SizefitConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SizefitConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`, or stock defaults if it is missing.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<SizefitConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `sizefit.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sizefit configuration
# =====================
# All options are optional. Values shown are the defaults.

[budget]
# Maximum encoded size. Integer bytes, or a number with B/KB/MB/GB
# (1024-based). Images already at or under this size are passed through.
max_size = "5MB"

# Initial encode quality in (0, 1]. When unset, search.start_quality is used.
# quality = 0.9

# Upper bounds on output dimensions. Images are only ever downscaled.
# max_width = 4096
# max_height = 4096

# Keep width:height when shrinking. When false, each axis is clamped
# independently.
maintain_aspect_ratio = true

[search]
# Quality search at full size: start_quality, then minus quality_step
# each time, continuing while quality > quality_cutoff.
# For lossless PNG, quality has no effect on size.
start_quality = 0.9
quality_step = 0.1
quality_cutoff = 0.1

# Fallback tiers tried in order once the quality search is exhausted.
# Each tier downscales to fit max_width x max_height and encodes once.
ladder = [
    { max_width = 1200, max_height = 800, quality = 0.7 },
    { max_width = 800, max_height = 600, quality = 0.5 },
]

[cache]
# Reuse results for identical source bytes + settings.
enabled = true
# Cached results older than this many seconds are recomputed.
ttl_secs = 604800

[processing]
# Number of images optimized at the same time.
# Omit to use the number of CPU cores.
# max_concurrent = 4
"##
}
