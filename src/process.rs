//! Batch driver: run the optimizer over files and directories.
//!
//! Each input file becomes one independent optimization. Files are read,
//! checked against the result cache, and the misses are optimized with up to
//! `max_concurrent` calls in flight. Attempts inside one call stay strictly
//! sequential; only whole files overlap.
//!
//! ## Output
//!
//! Results are handed to an [`AssetSink`] under their path relative to the
//! input they came from, keeping the source extension (the media type never
//! changes):
//!
//! ```text
//! photos/                    out/
//! ├── beach.jpg        →     ├── beach.jpg
//! └── 2024/                  ├── 2024/
//!     └── dawn.png     →     │   └── dawn.png
//!                            ├── .sizefit-cache.json
//!                            └── report.json
//! ```
//!
//! Two inputs that map to the same output name are rejected before any work
//! starts. A file that fails to optimize is reported and skipped; it never
//! aborts the batch. Only I/O on the output side and sink failures do.
//!
//! ## Cache
//!
//! The [`CacheManifest`] is passed in by `&mut` and updated in place. A hit
//! stored under a different output name is copied rather than re-encoded.

use crate::cache::{self, CacheEntry, CacheManifest, CacheStats};
use crate::imaging::{Quality, RasterBackend, RustBackend, get_dimensions};
use crate::optimize::{OptimizeError, SearchPolicy, optimize_with_policy};
use crate::transport::{AssetSink, DirectorySink, TransportError};
use crate::types::{
    EncodedAsset, ImageAsset, MediaType, OptimizationRequest, OptimizationResult, SearchStage,
};
use crate::validate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Declared type for files whose extension maps to no known raster type.
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Name of the batch report written next to the outputs.
pub const REPORT_FILENAME: &str = "report.json";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storing output failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Input not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("Duplicate output name '{name}': {} and {}", first.display(), second.display())]
    DuplicateOutput {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Optimization task failed: {0}")]
    Task(#[from] JoinError),
}

/// Everything a batch run needs besides the backend, sink, and cache.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Files or directories. Directories are walked recursively.
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub request: OptimizationRequest,
    pub policy: SearchPolicy,
    /// Upper bound on optimizations in flight.
    pub max_concurrent: usize,
    /// Load and consult `.sizefit-cache.json` in the output directory.
    pub use_cache: bool,
    pub cache_ttl: Duration,
}

/// A discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Output name relative to the sink root, `/`-separated.
    pub name: String,
    /// Declared MIME type, from the file extension.
    pub media_type: String,
}

/// How a single file ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Ran the search (or passed through) and stored the result.
    Optimized {
        optimized_size: u64,
        compression_ratio_percent: f64,
        width: u32,
        height: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        quality: Option<Quality>,
        stage: SearchStage,
        url: String,
    },
    /// Reused a previous result. `copied` when it lived under another name.
    Cached {
        optimized_size: u64,
        width: u32,
        height: u32,
        stage: SearchStage,
        copied: bool,
    },
    Failed { error: String },
}

/// Per-file line of the batch report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub source_path: String,
    pub output_name: String,
    pub original_size: u64,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    /// Bytes the output occupies, if one was produced.
    pub fn output_size(&self) -> Option<u64> {
        match &self.outcome {
            FileOutcome::Optimized { optimized_size, .. }
            | FileOutcome::Cached { optimized_size, .. } => Some(*optimized_size),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, FileOutcome::Failed { .. })
    }
}

/// Serializable outcome of a whole run, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub cache_stats: CacheStats,
    /// Sum of original sizes of files that produced output.
    pub total_original_bytes: u64,
    pub total_output_bytes: u64,
}

impl BatchReport {
    fn new(files: Vec<FileReport>, cache_stats: CacheStats) -> Self {
        let (total_original_bytes, total_output_bytes) = files
            .iter()
            .filter_map(|f| f.output_size().map(|out| (f.original_size, out)))
            .fold((0, 0), |(o, n), (a, b)| (o + a, n + b));
        Self {
            files,
            cache_stats,
            total_original_bytes,
            total_output_bytes,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_failure()).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.files.len() - self.failed_count()
    }

    /// Write `report.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ProcessError> {
        let path = dir.join(REPORT_FILENAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Progress events, sent as files finish (completion order, not input order).
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    BatchStarted { file_count: usize },
    FileProcessed {
        /// 1-based position in input order.
        index: usize,
        file_count: usize,
        report: FileReport,
    },
}

/// Header-level check of one input, without encoding anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub source_path: String,
    pub media_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<(u32, u32)>,
    pub within_budget: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Source discovery
// =============================================================================

/// Expand inputs into source files.
///
/// Explicit files are always included, named by their file name. Directories
/// are walked recursively in sorted order and only files with a raster
/// extension are kept, named relative to the directory. Two sources that
/// would land on the same output name are an error.
pub fn collect_sources(inputs: &[PathBuf]) -> Result<Vec<SourceFile>, ProcessError> {
    let mut sources: Vec<SourceFile> = Vec::new();

    for input in inputs {
        if input.is_file() {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ProcessError::SourceNotFound(input.clone()))?;
            sources.push(SourceFile {
                media_type: declared_media_type(input).to_string(),
                path: input.clone(),
                name,
            });
        } else if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|e| ProcessError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let Some(mime) = extension_mime(path) else {
                    continue;
                };
                let relative = path.strip_prefix(input).unwrap_or(path);
                sources.push(SourceFile {
                    path: path.to_path_buf(),
                    name: output_name(relative),
                    media_type: mime.to_string(),
                });
            }
        } else {
            return Err(ProcessError::SourceNotFound(input.clone()));
        }
    }

    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for source in &sources {
        if let Some(first) = seen.insert(source.name.as_str(), source.path.as_path()) {
            return Err(ProcessError::DuplicateOutput {
                name: source.name.clone(),
                first: first.to_path_buf(),
                second: source.path.clone(),
            });
        }
    }

    Ok(sources)
}

fn extension_mime(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(validate::mime_for_extension)
}

fn declared_media_type(path: &Path) -> &'static str {
    extension_mime(path).unwrap_or(UNKNOWN_MEDIA_TYPE)
}

fn output_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// =============================================================================
// Batch processing
// =============================================================================

/// Optimize every input with the `image`-crate backend, writing results into
/// `options.output_dir`. Loads and saves the cache manifest there.
pub async fn process(
    options: &ProcessOptions,
    events: Option<Sender<ProcessEvent>>,
) -> Result<BatchReport, ProcessError> {
    std::fs::create_dir_all(&options.output_dir)?;

    let mut cache = if options.use_cache {
        CacheManifest::load(&options.output_dir, options.cache_ttl)
    } else {
        CacheManifest::empty(options.cache_ttl)
    };
    let pruned = cache.prune_expired(cache::unix_now());
    if pruned > 0 {
        debug!(pruned, "dropped expired cache entries");
    }

    let sink = DirectorySink::new(&options.output_dir);
    let report = process_with_backend(
        Arc::new(RustBackend::new()),
        &sink,
        &mut cache,
        options,
        events,
    )
    .await?;

    cache.save(&options.output_dir)?;
    Ok(report)
}

/// Result of one spawned optimization.
struct Finished {
    index: usize,
    source: SourceFile,
    source_hash: String,
    original_size: u64,
    result: Result<OptimizationResult, OptimizeError>,
}

/// Process with an explicit backend, sink, and cache (allows testing with mocks).
///
/// Cache lookups consult `options.output_dir` for previously written files.
pub async fn process_with_backend<B>(
    backend: Arc<B>,
    sink: &impl AssetSink,
    cache: &mut CacheManifest,
    options: &ProcessOptions,
    events: Option<Sender<ProcessEvent>>,
) -> Result<BatchReport, ProcessError>
where
    B: RasterBackend + Send + 'static,
{
    let sources = collect_sources(&options.inputs)?;
    let file_count = sources.len();
    if let Some(tx) = &events {
        tx.send(ProcessEvent::BatchStarted { file_count }).ok();
    }

    let params_hash = cache::hash_request(&options.request, &options.policy);
    let policy = Arc::new(options.policy.clone());
    let max_concurrent = options.max_concurrent.max(1);
    let now = cache::unix_now();

    let mut stats = CacheStats::default();
    let mut reports: Vec<Option<FileReport>> = vec![None; file_count];
    let mut jobs: JoinSet<Finished> = JoinSet::new();

    let emit = |index: usize, report: &FileReport| {
        if let Some(tx) = &events {
            tx.send(ProcessEvent::FileProcessed {
                index: index + 1,
                file_count,
                report: report.clone(),
            })
            .ok();
        }
    };

    for (index, source) in sources.into_iter().enumerate() {
        let bytes = match std::fs::read(&source.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let report = failed_report(&source, 0, e.to_string());
                emit(index, &report);
                reports[index] = Some(report);
                continue;
            }
        };
        let original_size = bytes.len() as u64;
        let source_hash = cache::hash_source(&bytes, &source.media_type);

        let hit = MediaType::from_mime(&source.media_type).and_then(|media_type| {
            cache
                .find_cached(&source_hash, &params_hash, &options.output_dir, now)
                .map(|(stored, entry)| (media_type, stored, entry))
        });
        if let Some((media_type, stored, entry)) = hit {
            let copied = stored != source.name;
            if copied {
                let cached = EncodedAsset {
                    bytes: std::fs::read(options.output_dir.join(&stored))?.into(),
                    media_type,
                };
                sink.store(&source.name, &cached)?;
                cache.insert(source.name.clone(), entry.clone());
                stats.copy();
            } else {
                stats.hit();
            }
            debug!(source = %source.path.display(), copied, "cache hit");

            let report = FileReport {
                source_path: source.path.display().to_string(),
                output_name: source.name.clone(),
                original_size,
                outcome: FileOutcome::Cached {
                    optimized_size: entry.optimized_size,
                    width: entry.width,
                    height: entry.height,
                    stage: entry.stage,
                    copied,
                },
            };
            emit(index, &report);
            reports[index] = Some(report);
            continue;
        }
        stats.miss();

        while jobs.len() >= max_concurrent {
            if let Some(done) = jobs.join_next().await {
                let (index, report) = store_result(done?, sink, cache, &params_hash)?;
                emit(index, &report);
                reports[index] = Some(report);
            }
        }

        let backend = Arc::clone(&backend);
        let policy = Arc::clone(&policy);
        let request = options.request.clone();
        jobs.spawn(async move {
            let asset = ImageAsset::new(bytes, source.media_type.as_str());
            let result = optimize_with_policy(&*backend, &asset, &request, &policy).await;
            Finished {
                index,
                source,
                source_hash,
                original_size,
                result,
            }
        });
    }

    while let Some(done) = jobs.join_next().await {
        let (index, report) = store_result(done?, sink, cache, &params_hash)?;
        emit(index, &report);
        reports[index] = Some(report);
    }

    let files: Vec<FileReport> = reports.into_iter().flatten().collect();
    let report = BatchReport::new(files, stats);
    info!(
        files = report.files.len(),
        failed = report.failed_count(),
        original = report.total_original_bytes,
        output = report.total_output_bytes,
        "batch finished"
    );
    Ok(report)
}

/// Hand a finished optimization to the sink and record it in the cache.
fn store_result(
    done: Finished,
    sink: &impl AssetSink,
    cache: &mut CacheManifest,
    params_hash: &str,
) -> Result<(usize, FileReport), ProcessError> {
    let Finished {
        index,
        source,
        source_hash,
        original_size,
        result,
    } = done;

    let result = match result {
        Ok(result) => result,
        Err(e) => return Ok((index, failed_report(&source, original_size, e.to_string()))),
    };

    let stored = sink.store(&source.name, &result.encoded)?;
    cache.insert(
        source.name.clone(),
        CacheEntry {
            source_hash,
            params_hash: params_hash.to_string(),
            stored_at: cache::unix_now(),
            original_size,
            optimized_size: result.optimized_size,
            width: result.final_width,
            height: result.final_height,
            stage: result.stage,
        },
    );

    let report = FileReport {
        source_path: source.path.display().to_string(),
        output_name: source.name,
        original_size,
        outcome: FileOutcome::Optimized {
            optimized_size: result.optimized_size,
            compression_ratio_percent: result.compression_ratio_percent,
            width: result.final_width,
            height: result.final_height,
            quality: result.final_quality,
            stage: result.stage,
            url: stored.url,
        },
    };
    Ok((index, report))
}

fn failed_report(source: &SourceFile, original_size: u64, error: String) -> FileReport {
    FileReport {
        source_path: source.path.display().to_string(),
        output_name: source.name.clone(),
        original_size,
        outcome: FileOutcome::Failed { error },
    }
}

// =============================================================================
// Check
// =============================================================================

/// Validate inputs and read their headers without encoding anything.
pub fn check(
    backend: &impl RasterBackend,
    inputs: &[PathBuf],
    request: &OptimizationRequest,
) -> Result<Vec<CheckReport>, ProcessError> {
    let sources = collect_sources(inputs)?;
    let mut reports = Vec::with_capacity(sources.len());

    for source in sources {
        let bytes = std::fs::read(&source.path)?;
        let asset = ImageAsset::new(bytes, source.media_type.as_str());
        let size = asset.declared_size();

        let (dimensions, error) = match validate::media_type(&asset) {
            None => (
                None,
                Some(
                    OptimizeError::InvalidFileType {
                        media_type: source.media_type.clone(),
                    }
                    .to_string(),
                ),
            ),
            Some(media_type) => match get_dimensions(backend, &asset, media_type) {
                Ok(dims) => (Some(dims), None),
                Err(e) => (None, Some(e.to_string())),
            },
        };

        reports.push(CheckReport {
            source_path: source.path.display().to_string(),
            media_type: source.media_type,
            size,
            dimensions,
            within_budget: size <= request.budget(),
            error,
        });
    }

    Ok(reports)
}
