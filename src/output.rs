//! CLI output formatting for the export pipeline.
//!
//! # Output Format
//!
//! ## Progress stream (during `export`)
//!
//! ```text
//! Validating build output
//! Copying static assets
//! Rendering pages
//!     rendered 38/120
//!     rendered 120/120
//! Finalizing
//! ```
//!
//! ## Resolution listing (`resolve`)
//!
//! ```text
//! Paths
//! 001 / <- /
//! 002 /about <- /about
//! 003 /blog/hello <- /blog/[slug]
//!
//! Excluded dynamic pages
//!     /docs/[id]
//! ```
//!
//! ## Run summary
//!
//! ```text
//! Exported 120 paths, 2 not found, 14 prerendered copies in 3.4s
//! ```
//!
//! # Architecture
//!
//! Each surface has a `format_*` function (returns lines) for testability and
//! a `print_*` wrapper that writes to stdout or stderr. Format functions are
//! pure — no I/O, no side effects.

use crate::export::ExportReport;
use crate::paths::Resolution;
use crate::progress::ProgressEvent;
use std::time::Duration;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Seconds with one decimal, e.g. `3.4s`.
fn format_duration(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

// ============================================================================
// Progress stream
// ============================================================================

/// Format one progress event as display lines. Phase changes are flush-left
/// headers; progress and warnings are indented under the current phase.
pub fn format_progress_event(event: &ProgressEvent) -> Vec<String> {
    match event {
        ProgressEvent::Phase(phase) => vec![phase.to_string()],
        ProgressEvent::Progress { done, total } => {
            vec![format!("    rendered {done}/{total}")]
        }
        ProgressEvent::Warning(message) => vec![format!("    warning: {message}")],
    }
}

/// Print a progress event. Warnings go to stderr, the rest to stdout.
pub fn print_progress_event(event: &ProgressEvent) {
    let warning = matches!(event, ProgressEvent::Warning(_));
    for line in format_progress_event(event) {
        if warning {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

// ============================================================================
// Resolution listing
// ============================================================================

/// Format a resolved path map: each export path with the page it renders
/// from, then any exclusions.
pub fn format_resolution(resolution: &Resolution) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push("Paths".to_string());
    for (i, path) in resolution.paths.iter().enumerate() {
        lines.push(format!(
            "{} {} \u{2190} {}",
            format_index(i + 1),
            path.route,
            path.page
        ));
    }

    if !resolution.excluded_dynamic.is_empty() {
        lines.push(String::new());
        lines.push("Excluded dynamic pages".to_string());
        for page in &resolution.excluded_dynamic {
            lines.push(format!("    {}", page));
        }
    }

    if resolution.has_api_pages {
        lines.push(String::new());
        lines.push("API pages present (never exported)".to_string());
    }

    lines
}

/// Print a resolution listing to stdout.
pub fn print_resolution(resolution: &Resolution) {
    for line in format_resolution(resolution) {
        println!("{}", line);
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// One-line summary of a finished export run.
pub fn format_report(report: &ExportReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Exported {} paths, {} not found, {} prerendered copies in {}",
        report.paths_exported,
        report.not_found,
        report.prerendered_copied,
        format_duration(report.duration)
    )];
    if !report.excluded_dynamic.is_empty() {
        lines.push(format!(
            "Skipped {} dynamic pages with no export entry",
            report.excluded_dynamic.len()
        ));
    }
    lines
}

/// Print the run summary to stdout.
pub fn print_report(report: &ExportReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
