//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every file leads with its positional index and output name; the source
//! path and the outcome follow as indented context lines. Sizes are shown
//! 1024-based, matching how budgets are written in the config.
//!
//! # Output Format
//!
//! ## Optimize
//!
//! ```text
//! Optimizing 3 files
//! 001/003 beach.jpg
//!     Source: photos/beach.jpg
//!     optimized: 6.2 MB → 4.8 MB (22.6% smaller), 4000x3000 @ 0.80, quality search
//! 003/003 2024/dawn.png
//!     Source: photos/2024/dawn.png
//!     cached: 3.9 MB, 1200x800, fallback tier 1
//! 002/003 logo.gif
//!     Source: photos/logo.gif
//!     failed: invalid file type 'image/gif' (accepted: image/jpeg, image/png, image/webp)
//!
//! Optimized 2 of 3 files (1 failed)
//! Total: 10.1 MB → 8.7 MB (13.9% smaller)
//! Cache: 1 cached, 1 optimized (2 total)
//! ```
//!
//! ## Check
//!
//! ```text
//! 001 photos/beach.jpg (image/jpeg, 6.2 MB, 4000x3000): over budget
//! 002 photos/icon.png (image/png, 12.0 KB, 64x64): within budget
//! 003 photos/logo.gif (image/gif, 3.1 KB)
//!     invalid file type 'image/gif' (accepted: image/jpeg, image/png, image/webp)
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions do no I/O.

use crate::process::{BatchReport, CheckReport, FileOutcome, FileReport, ProcessEvent};
use crate::types::SearchStage;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count, 1024-based.
///
/// ```text
/// 512 B
/// 12.0 KB
/// 4.8 MB
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn percent_smaller(original: u64, output: u64) -> f64 {
    crate::types::compression_ratio_percent(original, output)
}

// ============================================================================
// Optimize output
// ============================================================================

/// Format the outcome line for one file (without the header).
fn outcome_line(report: &FileReport) -> String {
    match &report.outcome {
        FileOutcome::Optimized {
            stage: SearchStage::PassThrough,
            optimized_size,
            width,
            height,
            ..
        } => format!(
            "unchanged: {}, {}x{}, already within budget",
            format_bytes(*optimized_size),
            width,
            height
        ),
        FileOutcome::Optimized {
            optimized_size,
            compression_ratio_percent,
            width,
            height,
            quality,
            stage,
            ..
        } => {
            let quality = quality.map(|q| format!(" @ {}", q)).unwrap_or_default();
            format!(
                "optimized: {} \u{2192} {} ({:.1}% smaller), {}x{}{}, {}",
                format_bytes(report.original_size),
                format_bytes(*optimized_size),
                compression_ratio_percent,
                width,
                height,
                quality,
                stage
            )
        }
        FileOutcome::Cached {
            optimized_size,
            width,
            height,
            stage,
            copied,
        } => format!(
            "{}: {}, {}x{}, {}",
            if *copied { "copied" } else { "cached" },
            format_bytes(*optimized_size),
            width,
            height,
            stage
        ),
        FileOutcome::Failed { error } => format!("failed: {}", error),
    }
}

/// Format a single progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::BatchStarted { file_count } => match file_count {
            1 => vec!["Optimizing 1 file".to_string()],
            n => vec![format!("Optimizing {} files", n)],
        },
        ProcessEvent::FileProcessed {
            index,
            file_count,
            report,
        } => vec![
            format!(
                "{}/{} {}",
                format_index(*index),
                format_index(*file_count),
                report.output_name
            ),
            format!("{}Source: {}", indent(1), report.source_path),
            format!("{}{}", indent(1), outcome_line(report)),
        ],
    }
}

/// Format the closing summary of a batch run.
pub fn format_summary(report: &BatchReport) -> Vec<String> {
    let total = report.files.len();
    let failed = report.failed_count();

    let mut lines = Vec::new();
    if failed > 0 {
        lines.push(format!(
            "Optimized {} of {} files ({} failed)",
            report.succeeded_count(),
            total,
            failed
        ));
    } else {
        lines.push(format!("Optimized {} of {} files", total, total));
    }

    if report.total_original_bytes > 0 {
        lines.push(format!(
            "Total: {} \u{2192} {} ({:.1}% smaller)",
            format_bytes(report.total_original_bytes),
            format_bytes(report.total_output_bytes),
            percent_smaller(report.total_original_bytes, report.total_output_bytes)
        ));
    }
    lines.push(format!("Cache: {}", report.cache_stats));
    lines
}

/// Print a progress event to stdout.
pub fn print_process_event(event: &ProcessEvent) {
    for line in format_process_event(event) {
        println!("{}", line);
    }
}

/// Print the batch summary to stdout.
pub fn print_summary(report: &BatchReport) {
    for line in format_summary(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check output
// ============================================================================

/// Format `check` results: one line per file, errors as indented context.
pub fn format_check_output(reports: &[CheckReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, report) in reports.iter().enumerate() {
        let header = format!(
            "{} {} ({}, {}",
            format_index(i + 1),
            report.source_path,
            report.media_type,
            format_bytes(report.size)
        );
        match (&report.error, report.dimensions) {
            (Some(error), _) => {
                lines.push(format!("{})", header));
                lines.push(format!("{}{}", indent(1), error));
            }
            (None, Some((w, h))) => {
                let verdict = if report.within_budget {
                    "within budget"
                } else {
                    "over budget"
                };
                lines.push(format!("{}, {}x{}): {}", header, w, h, verdict));
            }
            (None, None) => lines.push(format!("{})", header)),
        }
    }
    lines
}

/// Print `check` results to stdout.
pub fn print_check_output(reports: &[CheckReport]) {
    for line in format_check_output(reports) {
        println!("{}", line);
    }
}
