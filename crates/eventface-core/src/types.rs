use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker placed in `search_errors` when a folder holds no usable reference images.
pub const NO_IMAGES_FOUND: &str = "No images found";

/// Convert a backend distance (lower = more similar) into a confidence in [0, 1].
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

/// One raw hit returned by a single reference search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Archive-relative or absolute path naming the stored photo.
    pub identity: String,
    /// Backend distance, non-negative. Lower = more similar.
    pub distance: f32,
    /// Derived: `max(0, 1 - distance)`.
    pub confidence: f32,
}

impl Candidate {
    pub fn new(identity: impl Into<String>, distance: f32) -> Self {
        Self {
            identity: identity.into(),
            distance,
            confidence: confidence_from_distance(distance),
        }
    }
}

/// Best-known result for one archive identity across every reference searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMatch {
    pub identity: String,
    pub distance: f32,
    pub confidence: f32,
}

impl From<Candidate> for AggregatedMatch {
    fn from(c: Candidate) -> Self {
        Self {
            identity: c.identity,
            distance: c.distance,
            confidence: c.confidence,
        }
    }
}

/// Outcome of searching the archive with every reference photo of one person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSearchResult {
    /// Folder name with `_` replaced by spaces.
    pub person_name: String,
    /// Descending confidence; ties keep first-seen order.
    pub matches: Vec<AggregatedMatch>,
    /// Number of reference images attempted, successful or not.
    pub reference_count: usize,
    /// Human-readable per-reference failures.
    pub search_errors: Vec<String>,
}

impl PersonSearchResult {
    /// Result for a folder that yielded no reference images.
    pub fn no_references(person_name: String) -> Self {
        Self {
            person_name,
            matches: Vec::new(),
            reference_count: 0,
            search_errors: vec![NO_IMAGES_FOUND.to_string()],
        }
    }
}

/// Derive the display name of a person from their reference folder.
///
/// Only underscores are rewritten; case, accents and repeated separators are kept.
pub fn person_name_from_folder(folder: &Path) -> String {
    folder
        .file_name()
        .map(|name| name.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

/// Result of exporting a person's matches to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSummary {
    pub copied_count: usize,
    /// Absolute path of the person's output directory.
    pub output_path: PathBuf,
    /// Human-readable reasons for every match that was not copied.
    pub skipped_files: Vec<String>,
}
