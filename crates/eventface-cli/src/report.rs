//! Human-readable rendering of search results.

use eventface_core::{ArchiveResolver, Candidate, OutputSummary, PersonSearchResult};
use std::fmt::Write;
use std::path::Path;

/// `0.8` → `"80.00%"`.
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}

fn file_name(identity: &str) -> String {
    Path::new(identity)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| identity.to_string())
}

pub fn render_person_result(result: &PersonSearchResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Person: {}", result.person_name);
    let _ = writeln!(out, "References searched: {}", result.reference_count);

    if result.matches.is_empty() {
        let _ = writeln!(out, "No matches found.");
    } else {
        let _ = writeln!(out, "Found {} matching photos:\n", result.matches.len());
        for (i, m) in result.matches.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {}  ({})",
                i + 1,
                m.identity,
                format_confidence(m.confidence)
            );
        }
    }
    out
}

pub fn render_output_summary(summary: &OutputSummary) -> String {
    format!(
        "Copied {} files to {}\n",
        summary.copied_count,
        summary.output_path.display()
    )
}

/// `None` when there is nothing to warn about.
pub fn render_warnings(search_errors: &[String], skipped_files: &[String]) -> Option<String> {
    if search_errors.is_empty() && skipped_files.is_empty() {
        return None;
    }
    let mut out = String::from("\nWarnings:\n");
    for line in search_errors.iter().chain(skipped_files) {
        let _ = writeln!(out, "  - {line}");
    }
    Some(out)
}

pub fn render_single_matches(matches: &[Candidate], resolver: &ArchiveResolver) -> String {
    if matches.is_empty() {
        return "No matches found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "Found {} matches:\n", matches.len());
    for (i, m) in matches.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, file_name(&m.identity));
        let _ = writeln!(out, "   Identity: {}", m.identity);
        let _ = writeln!(out, "   Full path: {}", resolver.resolve(&m.identity).display());
        let _ = writeln!(out, "   Confidence: {}\n", format_confidence(m.confidence));
    }
    out
}
