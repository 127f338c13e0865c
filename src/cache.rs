//! Result cache for repeated optimization runs.
//!
//! Decoding and re-encoding large photos is the expensive part of a run, and
//! the same source is often fed through again with unchanged settings. This
//! module lets the batch driver skip the search entirely when an identical
//! source was already optimized with identical settings recently.
//!
//! # Design
//!
//! The cache is an explicit object with an explicit time-to-live. The batch
//! driver receives it by `&mut` reference; there is no module-level state.
//!
//! ## Cache keys
//!
//! Lookups are **content-addressed** by `source_hash` and `params_hash`, not by
//! output path, so renaming or moving a source does not invalidate it.
//!
//! - **`source_hash`**: SHA-256 of the source bytes.
//! - **`params_hash`**: SHA-256 of the request (budget, quality, bounds,
//!   aspect flag) and the search policy (start, step, cutoff, ladder). Any
//!   change re-runs the search.
//!
//! A cache hit requires:
//! 1. An entry with matching `source_hash` and `params_hash` exists
//! 2. It was stored less than `ttl` ago
//! 3. The previously-written output file still exists on disk
//!
//! When a hit is found under a different output path, the caller copies the
//! cached file instead of re-running the search.
//!
//! ## Storage
//!
//! The manifest is a JSON file at `<output_dir>/.sizefit-cache.json`. Expired
//! entries are dropped on [`CacheManifest::prune_expired`].

use crate::optimize::SearchPolicy;
use crate::types::{OptimizationRequest, SearchStage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Name of the cache manifest file within the output directory.
const MANIFEST_FILENAME: &str = ".sizefit-cache.json";

/// Version of the cache manifest format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const MANIFEST_VERSION: u32 = 2;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single cached output file and the result that produced it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct CacheEntry {
    pub source_hash: String,
    pub params_hash: String,
    /// Unix seconds when the entry was written.
    pub stored_at: u64,
    pub original_size: u64,
    pub optimized_size: u64,
    pub width: u32,
    pub height: u32,
    pub stage: SearchStage,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.stored_at) < ttl.as_secs()
    }
}

/// On-disk cache manifest mapping output paths to their cache entries.
///
/// Lookups go through a runtime `content_index` that maps
/// `"{source_hash}:{params_hash}"` to the stored output path.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry>,
    /// Entries older than this are treated as absent.
    #[serde(skip)]
    ttl: Duration,
    /// Runtime reverse index: `"{source_hash}:{params_hash}"` → output_path.
    /// Built at load time, maintained on insert. Never serialized.
    #[serde(skip)]
    content_index: HashMap<String, String>,
}

impl CacheManifest {
    /// Create an empty manifest (used for `--no-cache` or a first run).
    pub fn empty(ttl: Duration) -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
            ttl,
            content_index: HashMap::new(),
        }
    }

    /// Load from the output directory. Returns an empty manifest if the
    /// file doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(output_dir: &Path, ttl: Duration) -> Self {
        let path = output_dir.join(MANIFEST_FILENAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(ttl),
        };
        let mut manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache manifest");
                return Self::empty(ttl);
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty(ttl);
        }
        manifest.ttl = ttl;
        manifest.content_index = build_content_index(&manifest.entries);
        manifest
    }

    /// Save to the output directory.
    pub fn save(&self, output_dir: &Path) -> io::Result<()> {
        let path = output_dir.join(MANIFEST_FILENAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh cached result by content hashes.
    ///
    /// Returns the stored output path and entry if one exists, is younger
    /// than the TTL at `now`, **and** its file is still on disk. The path may
    /// differ from the caller's expected output path; copying is the
    /// caller's job.
    pub fn find_cached(
        &self,
        source_hash: &str,
        params_hash: &str,
        output_dir: &Path,
        now: u64,
    ) -> Option<(String, CacheEntry)> {
        let content_key = format!("{}:{}", source_hash, params_hash);
        let stored_path = self.content_index.get(&content_key)?;
        let entry = self.entries.get(stored_path)?;
        if entry.is_fresh(now, self.ttl) && output_dir.join(stored_path).exists() {
            Some((stored_path.clone(), entry.clone()))
        } else {
            None
        }
    }

    /// Record a cache entry for an output file.
    ///
    /// If an entry with the same content already exists under a different
    /// output path, the old entry is removed.
    pub fn insert(&mut self, output_path: String, entry: CacheEntry) {
        let content_key = format!("{}:{}", entry.source_hash, entry.params_hash);

        if let Some(old_path) = self.content_index.get(&content_key)
            && *old_path != output_path
        {
            self.entries.remove(old_path.as_str());
        }

        self.content_index.insert(content_key, output_path.clone());
        self.entries.insert(output_path, entry);
    }

    /// Drop every entry that is stale at `now`. Returns how many were removed.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now, ttl));
        self.content_index = build_content_index(&self.entries);
        before - self.entries.len()
    }
}

/// Build the content_index reverse map from the entries map.
fn build_content_index(entries: &HashMap<String, CacheEntry>) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(output_path, entry)| {
            let content_key = format!("{}:{}", entry.source_hash, entry.params_hash);
            (content_key, output_path.clone())
        })
        .collect()
}

/// SHA-256 of the declared media type and the source bytes. The same bytes
/// declared as another type are a different source.
pub fn hash_source(bytes: &[u8], media_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(media_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn update_opt(hasher: &mut Sha256, value: Option<u32>) {
    match value {
        Some(v) => {
            hasher.update(b"\x01");
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update(b"\x00"),
    }
}

/// SHA-256 of everything that influences the search outcome besides the
/// source bytes.
pub fn hash_request(request: &OptimizationRequest, policy: &SearchPolicy) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"request\0");
    hasher.update(request.budget().to_le_bytes());
    match request.quality {
        Some(q) => {
            hasher.update(b"\x01");
            hasher.update(q.value().to_le_bytes());
        }
        None => hasher.update(b"\x00"),
    }
    update_opt(&mut hasher, request.max_width);
    update_opt(&mut hasher, request.max_height);
    hasher.update([u8::from(request.maintain_aspect_ratio)]);

    hasher.update(b"policy\0");
    hasher.update(policy.start_quality.value().to_le_bytes());
    hasher.update(policy.quality_step.to_le_bytes());
    hasher.update(policy.quality_cutoff.to_le_bytes());
    for tier in &policy.ladder {
        hasher.update(tier.max_width.to_le_bytes());
        hasher.update(tier.max_height.to_le_bytes());
        hasher.update(tier.quality.value().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Summary of cache performance for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u32,
    pub copies: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn copy(&mut self) {
        self.copies += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.copies + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.copies > 0 {
            if self.copies > 0 {
                write!(
                    f,
                    "{} cached, {} copied, {} optimized ({} total)",
                    self.hits,
                    self.copies,
                    self.misses,
                    self.total()
                )
            } else {
                write!(
                    f,
                    "{} cached, {} optimized ({} total)",
                    self.hits,
                    self.misses,
                    self.total()
                )
            }
        } else {
            write!(f, "{} optimized", self.misses)
        }
    }
}

/// Resolve the cache manifest path for an output directory.
pub fn manifest_path(output_dir: &Path) -> PathBuf {
    output_dir.join(MANIFEST_FILENAME)
}
